//! Shared fixtures: a bus with its monitor, driven by explicit virtual time

#![allow(dead_code)]

use canbus_sim::attack_sim::AttackCounters;
use canbus_sim::can_bus::{SendOutcome, VirtualCanBus};
use canbus_sim::config::{BusConfig, ProcessingCosts, SecurityTuning, SimConfig, TelemetryConfig};
use canbus_sim::security::{
    KeyMaterial, SecurityConfig, SecurityPipeline, SecurityStore, SharedSecurityConfig,
};
use canbus_sim::telemetry::{Monitor, SecurityStats};
use canbus_sim::types::{CanId, Origin, WireFrame};
use std::sync::Arc;
use std::time::Instant;

pub struct Harness {
    pub bus: Arc<VirtualCanBus>,
    pub monitor: Arc<Monitor>,
    pub pipeline: Arc<SecurityPipeline>,
    pub security: SharedSecurityConfig,
}

impl Harness {
    pub fn new(security: SecurityConfig) -> Self {
        Self::with_tuning(security, SecurityTuning::default())
    }

    /// Zero processing costs so latency is pure transmission time
    pub fn with_tuning(security: SecurityConfig, tuning: SecurityTuning) -> Self {
        let stats = Arc::new(SecurityStats::default());
        let monitor = Arc::new(Monitor::new(TelemetryConfig::default(), stats.clone()));
        let pipeline = Arc::new(SecurityPipeline::new(
            KeyMaterial::from_seed(42),
            ProcessingCosts::zero(),
            stats,
        ));
        let shared = SharedSecurityConfig::new(security);
        let bus = Arc::new(VirtualCanBus::new(
            BusConfig::default(),
            SecurityStore::new(&tuning),
            pipeline.clone(),
            shared.clone(),
            monitor.clone(),
        ));
        for node in SimConfig::reference_vehicle().nodes {
            monitor.register_node(&node);
        }
        Self {
            bus,
            monitor,
            pipeline,
            security: shared,
        }
    }

    /// Counters the monitor will update for frames from `session`
    pub fn session(&self, session: u64) -> Arc<AttackCounters> {
        let counters = Arc::new(AttackCounters::default());
        self.monitor.register_session(session, counters.clone());
        counters
    }

    /// Send as an attacker session would: count the attempt, then submit
    pub fn attack(&self, counters: &AttackCounters, wire: WireFrame, now: Instant) -> SendOutcome {
        counters.record_attempt();
        self.bus.request_send(wire, now)
    }

    /// Legitimate frame from `node`, protected under the current configuration
    pub fn legit(&self, node: &str, id: CanId, payload: Vec<u8>) -> WireFrame {
        let frame = canbus_sim::types::Frame::new(id, payload, Origin::ecu(node)).unwrap();
        self.pipeline
            .protect(&frame, &self.security.snapshot())
            .unwrap()
    }
}
