pub mod attack_sim;
pub mod can_bus;
pub mod config;
pub mod ecu;
pub mod error;
pub mod security;
pub mod simulation;
pub mod snapshot;
pub mod telemetry;
pub mod types;

pub use attack_sim::{AttackKind, AttackManager};
pub use can_bus::{Delivery, SendOutcome, VirtualCanBus};
pub use config::SimConfig;
pub use ecu::Ecu;
pub use error::{CommandError, ConfigError, Rejection, SimError};
pub use security::{SecurityConfig, SecurityMeasure, SecurityPipeline};
pub use simulation::Simulation;
pub use snapshot::SimulationSnapshot;
pub use telemetry::{HealthState, Monitor};
pub use types::{CanId, Frame, Origin, WireFrame};
