//! Attack sessions
//!
//! A session is one running attack: a generator driven by its own timer
//! task, submitting frames to the bus exactly like any other participant.
//! The manager owns at most one session per attack kind.

use crate::attack_sim::{
    AttackCounters, AttackGenerator, AttackKind, FloodAttack, ReplayAttack, SpoofAttack,
};
use crate::can_bus::VirtualCanBus;
use crate::config::AttackTuning;
use crate::error::CommandError;
use crate::snapshot::{AttackAction, AttackSessionSnapshot};
use crate::telemetry::Monitor;
use crate::types::CanId;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

pub struct AttackSession {
    kind: AttackKind,
    session: u64,
    target_ids: Vec<CanId>,
    started_at: DateTime<Utc>,
    counters: Arc<AttackCounters>,
    cancel: CancellationToken,
}

impl AttackSession {
    /// Spawn the generator's timer task on the current runtime
    pub fn spawn(
        mut generator: Box<dyn AttackGenerator>,
        session: u64,
        bus: Arc<VirtualCanBus>,
        counters: Arc<AttackCounters>,
    ) -> Self {
        let kind = generator.kind();
        let target_ids = generator.target_ids();
        let cancel = CancellationToken::new();

        let task_cancel = cancel.clone();
        let task_counters = counters.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(generator.cadence());
            ticker.set_missed_tick_behavior(generator.missed_tick_behavior());

            loop {
                tokio::select! {
                    biased;
                    _ = task_cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let now = Instant::now();
                for wire in generator.tick(now) {
                    task_counters.record_attempt();
                    bus.request_send(wire, now);
                }
            }
            tracing::debug!(attack = %kind, session, "attack task finished");
        });

        Self {
            kind,
            session,
            target_ids,
            started_at: Utc::now(),
            counters,
            cancel,
        }
    }

    pub fn kind(&self) -> AttackKind {
        self.kind
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn target_ids(&self) -> &[CanId] {
        &self.target_ids
    }

    pub fn counters(&self) -> &Arc<AttackCounters> {
        &self.counters
    }

    pub fn snapshot(&self) -> AttackSessionSnapshot {
        let counters = self.counters.snapshot();
        AttackSessionSnapshot {
            kind: self.kind,
            session: self.session,
            started_at: self.started_at,
            target_ids: self.target_ids.clone(),
            counters,
            success_rate: counters.success_rate(),
            detection_rate: counters.detection_rate(),
        }
    }

    /// Takes effect before the next tick; recorded counters stay as they are
    fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for AttackSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Start/stop surface for attack sessions, idempotent per kind
pub struct AttackManager {
    bus: Arc<VirtualCanBus>,
    monitor: Arc<Monitor>,
    config: AttackTuning,
    sessions: Mutex<BTreeMap<AttackKind, AttackSession>>,
    next_session: AtomicU64,
}

impl AttackManager {
    pub fn new(bus: Arc<VirtualCanBus>, monitor: Arc<Monitor>, config: AttackTuning) -> Self {
        Self {
            bus,
            monitor,
            config,
            sessions: Mutex::new(BTreeMap::new()),
            next_session: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<AttackKind, AttackSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn generator(&self, kind: AttackKind, session: u64) -> Box<dyn AttackGenerator> {
        match kind {
            AttackKind::Flood => Box::new(FloodAttack::new(self.config.flood.clone(), session)),
            AttackKind::Spoof => Box::new(SpoofAttack::new(self.config.spoof.clone(), session)),
            AttackKind::Replay => {
                let capture = self.bus.tap(&self.config.replay.targets);
                Box::new(ReplayAttack::new(self.config.replay.clone(), session, capture))
            }
        }
    }

    /// Start `kind`; `Ok(false)` if it was already running
    pub fn start(&self, kind: AttackKind) -> Result<bool, CommandError> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(CommandError::NotRunning);
        }

        let mut sessions = self.lock();
        if sessions.contains_key(&kind) {
            tracing::debug!(attack = %kind, "attack already active");
            return Ok(false);
        }

        let session = self.next_session.fetch_add(1, Ordering::Relaxed);
        let counters = Arc::new(AttackCounters::default());
        // Register before the first frame can produce an outcome
        self.monitor.register_session(session, counters.clone());

        let generator = self.generator(kind, session);
        let attack = AttackSession::spawn(generator, session, self.bus.clone(), counters);
        tracing::info!(
            attack = %kind,
            session,
            targets = ?attack.target_ids(),
            "attack started"
        );
        self.monitor.log_attack(AttackAction::Started, kind, session, Instant::now());
        sessions.insert(kind, attack);
        Ok(true)
    }

    /// Stop `kind`; `false` if it was not running. Counters are discarded.
    pub fn stop(&self, kind: AttackKind) -> bool {
        let Some(attack) = self.lock().remove(&kind) else {
            tracing::debug!(attack = %kind, "attack not active");
            return false;
        };

        // Outcomes still in flight are no longer attributed to the session
        self.monitor.unregister_session(attack.session());
        attack.cancel();
        let counters = attack.counters.snapshot();
        tracing::info!(
            attack = %kind,
            session = attack.session(),
            attempts = counters.attempts,
            delivered = counters.delivered,
            blocked = counters.blocked,
            "attack stopped"
        );
        self.monitor.log_attack(AttackAction::Stopped, kind, attack.session(), Instant::now());
        true
    }

    pub fn stop_all(&self) {
        for kind in AttackKind::ALL {
            self.stop(kind);
        }
    }

    pub fn is_active(&self, kind: AttackKind) -> bool {
        self.lock().contains_key(&kind)
    }

    pub fn snapshots(&self) -> Vec<AttackSessionSnapshot> {
        self.lock().values().map(AttackSession::snapshot).collect()
    }
}
