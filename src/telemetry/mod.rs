//! Telemetry and health monitor
//!
//! The monitor sees every frame outcome reported by the bus: admission
//! rejections, anomaly tags, starvation drops and completed transmissions.
//! From those it keeps per-node rolling latency, attack-event windows for
//! health classification, aggregate security statistics and the counters of
//! the currently running attack sessions.

pub mod health;
pub mod stats;

pub use health::{AttackEventLog, AttackOutcome, EventCounts, HealthState, classify};
pub use stats::{LatencyWindow, OverheadBreakdown, SecurityStats, SecurityStatsSnapshot};

use crate::attack_sim::{AttackCounters, AttackKind};
use crate::config::{Criticality, NodeConfig, TelemetryConfig};
use crate::error::Rejection;
use crate::snapshot::{AttackAction, AttackLogEntry, LatencySample, LatencyWarning};
use crate::types::{CanId, Origin};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Result of one transmission, after every subscriber ran its checks
#[derive(Debug, Clone, Default)]
pub struct TransmissionReport {
    /// Subscriber name and end-to-end latency of each successful delivery
    pub delivered: Vec<(String, Duration)>,
    /// Subscribers whose checks rejected the frame
    pub rejected: Vec<(String, Rejection)>,
}

impl TransmissionReport {
    /// Every subscriber accepted the frame (vacuously true without subscribers)
    pub fn fully_delivered(&self) -> bool {
        self.rejected.is_empty()
    }
}

#[derive(Debug)]
struct NodeRecord {
    owned: Vec<CanId>,
    subscriptions: Vec<CanId>,
    criticality: Criticality,
    latency: LatencyWindow,
    last_starved: Option<Instant>,
    frames_sent: u64,
    frames_received: u64,
    over_threshold: bool,
}

impl NodeRecord {
    fn watched_ids(&self) -> impl Iterator<Item = &CanId> {
        self.owned.iter().chain(self.subscriptions.iter())
    }
}

#[derive(Debug)]
struct MonitorState {
    nodes: BTreeMap<String, NodeRecord>,
    events: AttackEventLog,
    recent_latency: VecDeque<LatencySample>,
    attack_log: VecDeque<(Instant, AttackLogEntry)>,
}

/// Per-node view assembled by the monitor
#[derive(Debug, Clone)]
pub struct NodeTelemetry {
    pub name: String,
    pub criticality: Criticality,
    pub health: HealthState,
    pub owned: Vec<CanId>,
    pub subscriptions: Vec<CanId>,
    pub average_latency: Option<Duration>,
    pub max_latency: Option<Duration>,
    pub latency_samples: usize,
    pub recent_attack_events: EventCounts,
    pub frames_sent: u64,
    pub frames_received: u64,
}

pub struct Monitor {
    config: TelemetryConfig,
    stats: Arc<SecurityStats>,
    sessions: RwLock<HashMap<u64, Arc<AttackCounters>>>,
    state: Mutex<MonitorState>,
}

impl Monitor {
    pub fn new(config: TelemetryConfig, stats: Arc<SecurityStats>) -> Self {
        let events = AttackEventLog::new(config.health_window);
        Self {
            config,
            stats,
            sessions: RwLock::new(HashMap::new()),
            state: Mutex::new(MonitorState {
                nodes: BTreeMap::new(),
                events,
                recent_latency: VecDeque::new(),
                attack_log: VecDeque::new(),
            }),
        }
    }

    pub fn stats(&self) -> &Arc<SecurityStats> {
        &self.stats
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register_node(&self, node: &NodeConfig) {
        let record = NodeRecord {
            owned: node.owned.iter().map(|s| s.id).collect(),
            subscriptions: node.subscriptions.clone(),
            criticality: node.criticality,
            latency: LatencyWindow::new(self.config.latency_history),
            last_starved: None,
            frames_sent: 0,
            frames_received: 0,
            over_threshold: false,
        };
        self.lock().nodes.insert(node.name.clone(), record);
    }

    /// Outcomes of frames from `session` are counted until it is unregistered
    pub fn register_session(&self, session: u64, counters: Arc<AttackCounters>) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session, counters);
    }

    /// Late outcomes of a stopped session are ignored from here on
    pub fn unregister_session(&self, session: u64) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&session);
    }

    fn session_counters(&self, origin: &Origin) -> Option<Arc<AttackCounters>> {
        match origin {
            Origin::Attacker { session, .. } => self
                .sessions
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(session)
                .cloned(),
            Origin::Ecu(_) => None,
        }
    }

    pub fn log_attack(&self, action: AttackAction, kind: AttackKind, session: u64, now: Instant) {
        let retention = self.config.event_retention;
        let mut state = self.lock();
        while let Some((at, _)) = state.attack_log.front() {
            if now.saturating_duration_since(*at) > retention {
                state.attack_log.pop_front();
            } else {
                break;
            }
        }
        state.attack_log.push_back((
            now,
            AttackLogEntry {
                at: Utc::now(),
                action,
                kind,
                session,
            },
        ));
    }

    /// Frame rejected at admission or dropped from the arbitration queue
    pub fn record_rejection(&self, origin: &Origin, id: CanId, rejection: Rejection, now: Instant) {
        tracing::debug!(can_id = %id, %origin, stage = %rejection.stage(), "frame rejected: {}", rejection);

        match rejection {
            Rejection::RateExceeded => self.stats.record_rate_limit_violation(),
            Rejection::Starved => self.stats.record_starved(),
            Rejection::InvalidEncryption | Rejection::InvalidMac => {}
        }

        let mut state = self.lock();
        match origin {
            Origin::Ecu(name) => {
                if rejection == Rejection::Starved {
                    if let Some(node) = state.nodes.get_mut(name) {
                        node.last_starved = Some(now);
                    }
                }
            }
            Origin::Attacker { .. } => {
                self.stats.record_attack_blocked();
                state.events.record(id, AttackOutcome::Blocked, now);
                if rejection.is_security() {
                    self.stats.record_attack_detected();
                    state.events.record(id, AttackOutcome::Detected, now);
                }
                drop(state);

                if let Some(counters) = self.session_counters(origin) {
                    counters.record_blocked();
                    if rejection.is_security() {
                        counters.record_detected();
                    }
                }
            }
        }
    }

    /// Admitted frame tagged by intrusion detection (still delivered)
    pub fn record_anomaly(&self, origin: &Origin, id: CanId, now: Instant) {
        self.stats.record_anomaly();
        if !origin.is_attacker() {
            tracing::debug!(can_id = %id, %origin, "legitimate frame flagged as anomalous");
            return;
        }

        self.stats.record_attack_detected();
        self.lock().events.record(id, AttackOutcome::Detected, now);
        if let Some(counters) = self.session_counters(origin) {
            counters.record_detected();
        }
    }

    /// Frame won arbitration and went through every subscriber
    pub fn record_transmission(&self, origin: &Origin, id: CanId, report: &TransmissionReport, now: Instant) {
        let thresholds = self.config.latency_thresholds;
        let recent_cap = self.config.recent_samples;
        let mut state = self.lock();

        for (subscriber, _) in &report.delivered {
            if let Some(node) = state.nodes.get_mut(subscriber) {
                node.frames_received += 1;
            }
        }

        if let Origin::Ecu(name) = origin {
            if let Some(node) = state.nodes.get_mut(name) {
                node.frames_sent += 1;
                for (_, latency) in &report.delivered {
                    node.latency.push(*latency);
                }

                if let Some(average) = node.latency.average() {
                    let threshold = node.criticality.threshold(&thresholds);
                    let over = average > threshold;
                    if over && !node.over_threshold {
                        tracing::warn!(
                            node = %name,
                            level = node.criticality.as_str(),
                            average_us = average.as_micros() as u64,
                            threshold_us = threshold.as_micros() as u64,
                            "latency above threshold"
                        );
                    }
                    node.over_threshold = over;
                }
            }

            let at: DateTime<Utc> = Utc::now();
            for (_, latency) in &report.delivered {
                if state.recent_latency.len() == recent_cap.max(1) {
                    state.recent_latency.pop_front();
                }
                state.recent_latency.push_back(LatencySample {
                    at,
                    node: name.clone(),
                    id,
                    latency_us: latency.as_micros() as u64,
                });
            }
            return;
        }

        let delivered = report.fully_delivered();
        if delivered {
            self.stats.record_attack_successful();
            state.events.record(id, AttackOutcome::Delivered, now);
        } else {
            self.stats.record_attack_blocked();
            state.events.record(id, AttackOutcome::Blocked, now);
        }
        drop(state);

        if let Some(counters) = self.session_counters(origin) {
            if delivered {
                counters.record_delivered();
            } else {
                counters.record_blocked();
            }
        }
    }

    pub fn health(&self, node: &str, now: Instant) -> Option<HealthState> {
        let state = self.lock();
        let record = state.nodes.get(node)?;
        Some(self.classify_node(&state, record, now))
    }

    fn classify_node(&self, state: &MonitorState, record: &NodeRecord, now: Instant) -> HealthState {
        let counts = state.events.counts(record.watched_ids(), now);
        let starved = record
            .last_starved
            .is_some_and(|at| now.saturating_duration_since(at) <= self.config.health_window);
        classify(&counts, starved)
    }

    pub fn node_telemetry(&self, now: Instant) -> Vec<NodeTelemetry> {
        let state = self.lock();
        state
            .nodes
            .iter()
            .map(|(name, record)| NodeTelemetry {
                name: name.clone(),
                criticality: record.criticality,
                health: self.classify_node(&state, record, now),
                owned: record.owned.clone(),
                subscriptions: record.subscriptions.clone(),
                average_latency: record.latency.average(),
                max_latency: record.latency.max(),
                latency_samples: record.latency.len(),
                recent_attack_events: state.events.counts(record.watched_ids(), now),
                frames_sent: record.frames_sent,
                frames_received: record.frames_received,
            })
            .collect()
    }

    pub fn compromised_nodes(&self, now: Instant) -> Vec<String> {
        let state = self.lock();
        state
            .nodes
            .iter()
            .filter(|(_, record)| self.classify_node(&state, record, now) == HealthState::Compromised)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Nodes whose rolling average latency exceeds their class threshold
    pub fn warnings(&self) -> Vec<LatencyWarning> {
        let thresholds = self.config.latency_thresholds;
        let state = self.lock();
        state
            .nodes
            .iter()
            .filter_map(|(name, record)| {
                let average = record.latency.average()?;
                let threshold = record.criticality.threshold(&thresholds);
                (average > threshold).then(|| LatencyWarning {
                    node: name.clone(),
                    level: record.criticality,
                    average_us: average.as_micros() as u64,
                    threshold_us: threshold.as_micros() as u64,
                    message: format!(
                        "{} latency {:.2} ms exceeds {} threshold {:.2} ms",
                        name,
                        average.as_secs_f64() * 1000.0,
                        record.criticality.as_str(),
                        threshold.as_secs_f64() * 1000.0
                    ),
                })
            })
            .collect()
    }

    pub fn bus_compromised(&self, now: Instant) -> bool {
        self.lock().events.delivery_within_window(now)
    }

    pub fn recent_latency(&self) -> Vec<LatencySample> {
        self.lock().recent_latency.iter().cloned().collect()
    }

    pub fn attack_log(&self, now: Instant) -> Vec<AttackLogEntry> {
        let retention = self.config.event_retention;
        self.lock()
            .attack_log
            .iter()
            .filter(|(at, _)| now.saturating_duration_since(*at) <= retention)
            .map(|(_, entry)| entry.clone())
            .collect()
    }
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor").field("config", &self.config).finish()
    }
}
