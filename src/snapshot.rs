//! Serializable view of a running simulation
//!
//! Everything a dashboard or report needs, detached from the live state.
//! Produced by [`crate::simulation::Simulation::get_snapshot`].

use crate::attack_sim::{AttackCountersSnapshot, AttackKind};
use crate::config::Criticality;
use crate::security::SecurityConfig;
use crate::telemetry::{EventCounts, HealthState, SecurityStatsSnapshot};
use crate::types::CanId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationSnapshot {
    pub taken_at: DateTime<Utc>,
    pub uptime_ms: u64,
    pub security: SecurityConfig,
    pub security_stats: SecurityStatsSnapshot,
    pub bus: BusSnapshot,
    pub nodes: Vec<NodeSnapshot>,
    pub attacks: Vec<AttackSessionSnapshot>,
    pub attack_log: Vec<AttackLogEntry>,
    pub recent_latency: Vec<LatencySample>,
    pub warnings: Vec<LatencyWarning>,
    pub compromised_nodes: Vec<String>,
}

impl SimulationSnapshot {
    pub fn node(&self, name: &str) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn attack(&self, kind: AttackKind) -> Option<&AttackSessionSnapshot> {
        self.attacks.iter().find(|a| a.kind == kind)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusSnapshot {
    /// Frames that won arbitration
    pub transmitted: u64,
    /// Successful subscriber deliveries
    pub deliveries: u64,
    /// Frames rejected at admission or dropped as starved
    pub blocked: u64,
    pub queue_depth: usize,
    /// Medium occupancy since start, microseconds
    pub busy_us: u64,
    /// An attacker frame reached the medium within the health window
    pub compromised: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub name: String,
    pub criticality: Criticality,
    pub health: HealthState,
    pub owned_ids: Vec<CanId>,
    pub subscriptions: Vec<CanId>,
    pub average_latency_us: Option<u64>,
    pub max_latency_us: Option<u64>,
    pub latency_samples: usize,
    /// Attack-related events on this node's identifiers within the health window
    pub recent_attack_events: EventCounts,
    pub frames_sent: u64,
    pub frames_received: u64,
    /// Last value received per subscribed identifier
    pub last_values: Vec<SignalValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalValue {
    pub id: CanId,
    pub name: String,
    /// Raw payload, hex encoded
    pub raw: String,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackSessionSnapshot {
    pub kind: AttackKind,
    pub session: u64,
    pub started_at: DateTime<Utc>,
    pub target_ids: Vec<CanId>,
    pub counters: AttackCountersSnapshot,
    pub success_rate: f64,
    pub detection_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackAction {
    Started,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackLogEntry {
    pub at: DateTime<Utc>,
    pub action: AttackAction,
    pub kind: AttackKind,
    pub session: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencySample {
    pub at: DateTime<Utc>,
    pub node: String,
    pub id: CanId,
    pub latency_us: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyWarning {
    pub node: String,
    pub level: Criticality,
    pub average_us: u64,
    pub threshold_us: u64,
    pub message: String,
}
