//! Simulation orchestrator
//!
//! Wires the shared pieces together (one pipeline, one bus, one monitor),
//! runs the ECU tasks and the arbitration driver, and exposes the control
//! surface: security toggles, attack start/stop and snapshots.

use crate::attack_sim::{AttackKind, AttackManager};
use crate::can_bus::VirtualCanBus;
use crate::config::SimConfig;
use crate::ecu::{Ecu, EcuView};
use crate::error::{CommandError, SimError};
use crate::security::{
    KeyMaterial, SecurityConfig, SecurityMeasure, SecurityPipeline, SecurityStore,
    SharedSecurityConfig,
};
use crate::snapshot::{NodeSnapshot, SignalValue, SimulationSnapshot};
use crate::telemetry::{Monitor, NodeTelemetry, SecurityStats};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Runtime {
    views: BTreeMap<String, watch::Receiver<EcuView>>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct Simulation {
    config: SimConfig,
    monitor: Arc<Monitor>,
    pipeline: Arc<SecurityPipeline>,
    security: SharedSecurityConfig,
    bus: Arc<VirtualCanBus>,
    attacks: AttackManager,
    cancel: CancellationToken,
    runtime: Mutex<Runtime>,
    created_at: Instant,
}

impl Simulation {
    /// Validate `config` and build the simulation with freshly generated keys
    pub fn new(config: SimConfig) -> Result<Self, SimError> {
        Self::with_keys(config, KeyMaterial::generate())
    }

    pub fn with_keys(config: SimConfig, keys: KeyMaterial) -> Result<Self, SimError> {
        config.validate()?;

        let stats = Arc::new(SecurityStats::default());
        let monitor = Arc::new(Monitor::new(config.telemetry.clone(), stats.clone()));
        let pipeline = Arc::new(SecurityPipeline::new(keys, config.security.costs, stats));
        let security = SharedSecurityConfig::new(config.security.initial);
        let bus = Arc::new(VirtualCanBus::new(
            config.bus.clone(),
            SecurityStore::new(&config.security),
            pipeline.clone(),
            security.clone(),
            monitor.clone(),
        ));
        for node in &config.nodes {
            monitor.register_node(node);
        }
        let attacks = AttackManager::new(bus.clone(), monitor.clone(), config.attacks.clone());

        tracing::info!(
            nodes = config.nodes.len(),
            key = %pipeline.keys().fingerprint(),
            "simulation initialized"
        );

        Ok(Self {
            config,
            monitor,
            pipeline,
            security,
            bus,
            attacks,
            cancel: CancellationToken::new(),
            runtime: Mutex::new(Runtime::default()),
            created_at: Instant::now(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Runtime> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the bus driver and one task per ECU on the current runtime.
    /// Calling it again while running is a no-op; a simulation that was
    /// shut down cannot be started again.
    pub fn start(&self) -> Result<(), CommandError> {
        if tokio::runtime::Handle::try_current().is_err() || self.cancel.is_cancelled() {
            return Err(CommandError::NotRunning);
        }

        let mut runtime = self.lock();
        if !runtime.tasks.is_empty() {
            return Ok(());
        }

        runtime.tasks.push(self.bus.spawn_driver(self.cancel.child_token()));
        for node in &self.config.nodes {
            let (ecu, view) = Ecu::new(
                node.clone(),
                self.pipeline.clone(),
                self.security.clone(),
                self.bus.clone(),
            );
            runtime.views.insert(node.name.clone(), view);
            runtime.tasks.push(ecu.spawn(self.cancel.child_token()));
        }

        tracing::info!(
            nodes = self.config.nodes.len(),
            security = ?self.security.snapshot(),
            "simulation started"
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        !self.lock().tasks.is_empty() && !self.cancel.is_cancelled()
    }

    /// Stop every attack, then every task, and wait for them
    pub async fn shutdown(&self) {
        self.attacks.stop_all();
        self.cancel.cancel();

        let tasks = std::mem::take(&mut self.lock().tasks);
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "simulation task ended abnormally");
            }
        }
        tracing::info!("simulation stopped");
    }

    /// Enable or disable one measure by name; applies to frames built after the call
    pub fn toggle_security(&self, measure: &str, enabled: bool) -> Result<(), CommandError> {
        let measure: SecurityMeasure = measure.parse()?;
        let previous = self.security.set(measure, enabled);
        if previous != enabled {
            tracing::info!(%measure, enabled, "security measure toggled");
        }
        Ok(())
    }

    /// Start an attack by name; starting an active attack is a no-op
    pub fn start_attack(&self, kind: &str) -> Result<(), CommandError> {
        let kind: AttackKind = kind.parse()?;
        if self.cancel.is_cancelled() {
            return Err(CommandError::NotRunning);
        }
        self.attacks.start(kind)?;
        Ok(())
    }

    /// Stop an attack by name; stopping an inactive attack is a no-op
    pub fn stop_attack(&self, kind: &str) -> Result<(), CommandError> {
        let kind: AttackKind = kind.parse()?;
        self.attacks.stop(kind);
        Ok(())
    }

    pub fn security_config(&self) -> SecurityConfig {
        self.security.snapshot()
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<VirtualCanBus> {
        &self.bus
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    pub fn pipeline(&self) -> &Arc<SecurityPipeline> {
        &self.pipeline
    }

    pub fn attacks(&self) -> &AttackManager {
        &self.attacks
    }

    /// Side-effect-free view of the whole simulation
    pub fn get_snapshot(&self) -> SimulationSnapshot {
        let now = Instant::now();
        let views = self.lock().views.clone();

        let nodes = self
            .monitor
            .node_telemetry(now)
            .into_iter()
            .map(|node| {
                let last_values = views
                    .get(&node.name)
                    .map(|view| view.borrow().signal_values())
                    .unwrap_or_default();
                node_snapshot(node, last_values)
            })
            .collect();

        SimulationSnapshot {
            taken_at: Utc::now(),
            uptime_ms: now.saturating_duration_since(self.created_at).as_millis() as u64,
            security: self.security.snapshot(),
            security_stats: self.monitor.stats().snapshot(),
            bus: self.bus.stats(now),
            nodes,
            attacks: self.attacks.snapshots(),
            attack_log: self.monitor.attack_log(now),
            recent_latency: self.monitor.recent_latency(),
            warnings: self.monitor.warnings(),
            compromised_nodes: self.monitor.compromised_nodes(now),
        }
    }
}

fn node_snapshot(node: NodeTelemetry, last_values: Vec<SignalValue>) -> NodeSnapshot {
    NodeSnapshot {
        name: node.name,
        criticality: node.criticality,
        health: node.health,
        owned_ids: node.owned,
        subscriptions: node.subscriptions,
        average_latency_us: node.average_latency.map(|d| d.as_micros() as u64),
        max_latency_us: node.max_latency.map(|d| d.as_micros() as u64),
        latency_samples: node.latency_samples,
        recent_attack_events: node.recent_attack_events,
        frames_sent: node.frames_sent,
        frames_received: node.frames_received,
        last_values,
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
