use crate::config::BusConfig;
use crate::error::Rejection;
use crate::security::{SecurityConfig, SecurityPipeline, SecurityStore, SharedSecurityConfig};
use crate::snapshot::BusSnapshot;
use crate::telemetry::{Monitor, TransmissionReport};
use crate::types::{CanId, Frame, Origin, WireFrame};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// At most one starvation warning per interval while a flood lasts
const STARVATION_WARNING_INTERVAL: Duration = Duration::from_secs(1);

/// Frame handed to a subscriber after its own checks passed
#[derive(Debug, Clone)]
pub struct Delivery {
    pub frame: Frame,
    /// Tagged by intrusion detection at admission (advisory)
    pub anomalous: bool,
}

/// Result of `request_send`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Admitted and waiting for arbitration
    Queued { seq: u64 },
    /// Rejected at admission, never reaches the medium
    Rejected(Rejection),
}

impl SendOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, SendOutcome::Queued { .. })
    }
}

#[derive(Debug)]
struct QueuedFrame {
    wire: WireFrame,
    /// Configuration captured at admission, reused by every subscriber
    config: SecurityConfig,
    enqueued_at: Instant,
    /// Earliest arbitration time, after sender-side processing
    ready_at: Instant,
    anomalous: bool,
}

#[derive(Debug)]
struct Subscriber {
    name: String,
    tx: mpsc::UnboundedSender<Delivery>,
}

#[derive(Debug, Default)]
struct BusCounters {
    transmitted: u64,
    deliveries: u64,
    blocked: u64,
    busy: Duration,
}

#[derive(Debug)]
struct BusState {
    /// Arbitration order: lowest identifier first, then submission order
    queue: BTreeMap<(CanId, u64), QueuedFrame>,
    /// Submission order, for the starvation sweep
    arrivals: VecDeque<(Instant, CanId, u64)>,
    next_seq: u64,
    /// End of the transmission currently occupying the medium
    bus_free_at: Option<Instant>,
    store: SecurityStore,
    subscribers: HashMap<CanId, Vec<Subscriber>>,
    taps: HashMap<CanId, Vec<mpsc::UnboundedSender<WireFrame>>>,
    counters: BusCounters,
    last_starvation_warning: Option<Instant>,
}

/// Virtual CAN Bus
///
/// Priority arbitration over a virtual medium clock. Frames are admitted
/// through the security pipeline, queued by `(id, submission order)` and
/// transmitted one per round: the lowest identifier among the frames ready
/// at the round start wins, losers stay queued until they win or age out.
/// Transmission time advances the medium clock, never the caller's.
pub struct VirtualCanBus {
    config: BusConfig,
    pipeline: Arc<SecurityPipeline>,
    security: SharedSecurityConfig,
    monitor: Arc<Monitor>,
    state: Mutex<BusState>,
    wakeup: Notify,
}

impl VirtualCanBus {
    pub fn new(
        config: BusConfig,
        store: SecurityStore,
        pipeline: Arc<SecurityPipeline>,
        security: SharedSecurityConfig,
        monitor: Arc<Monitor>,
    ) -> Self {
        Self {
            config,
            pipeline,
            security,
            monitor,
            state: Mutex::new(BusState {
                queue: BTreeMap::new(),
                arrivals: VecDeque::new(),
                next_seq: 0,
                bus_free_at: None,
                store,
                subscribers: HashMap::new(),
                taps: HashMap::new(),
                counters: BusCounters::default(),
                last_starvation_warning: None,
            }),
            wakeup: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Receive every frame on `ids` that passes this subscriber's checks
    pub fn subscribe(&self, name: impl Into<String>, ids: &[CanId]) -> mpsc::UnboundedReceiver<Delivery> {
        let name = name.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        for id in ids {
            state.subscribers.entry(*id).or_default().push(Subscriber {
                name: name.clone(),
                tx: tx.clone(),
            });
        }
        rx
    }

    /// Passive listener: raw wire frames on `ids`, envelope included,
    /// without any verification
    pub fn tap(&self, ids: &[CanId]) -> mpsc::UnboundedReceiver<WireFrame> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        for id in ids {
            state.taps.entry(*id).or_default().push(tx.clone());
        }
        rx
    }

    pub fn subscriber_count(&self, id: CanId) -> usize {
        self.lock().subscribers.get(&id).map_or(0, Vec::len)
    }

    /// Submit a frame for transmission
    ///
    /// Runs the inbound pipeline once, under the configuration the sender
    /// built the frame with, or the current one for frames put on the wire
    /// as-is and for anything an attacker sends. Admitted frames join the
    /// arbitration queue; any arbitration rounds due by `now` are run
    /// before returning.
    pub fn request_send(&self, wire: WireFrame, now: Instant) -> SendOutcome {
        let config = match wire.built_under {
            Some(built_under) if !wire.origin.is_attacker() => built_under,
            _ => self.security.snapshot(),
        };
        let mut state = self.lock();

        let outcome = match self.pipeline.unprotect(&wire, &config, &mut state.store, now) {
            Err(rejection) => {
                state.counters.blocked += 1;
                self.monitor.record_rejection(&wire.origin, wire.id(), rejection, now);
                SendOutcome::Rejected(rejection)
            }
            Ok(admitted) => {
                if admitted.anomalous {
                    self.monitor.record_anomaly(&wire.origin, wire.id(), now);
                }
                let seq = state.next_seq;
                state.next_seq += 1;
                let id = wire.id();
                let ready_at = now + wire.protect_cost;
                state.arrivals.push_back((now, id, seq));
                state.queue.insert(
                    (id, seq),
                    QueuedFrame {
                        wire,
                        config,
                        enqueued_at: now,
                        ready_at,
                        anomalous: admitted.anomalous,
                    },
                );
                SendOutcome::Queued { seq }
            }
        };

        self.run_rounds(&mut state, now);
        drop(state);
        self.wakeup.notify_one();
        outcome
    }

    /// Run every arbitration round due by `now`; returns frames transmitted
    pub fn pump(&self, now: Instant) -> usize {
        let mut state = self.lock();
        self.run_rounds(&mut state, now)
    }

    fn run_rounds(&self, state: &mut BusState, now: Instant) -> usize {
        let mut transmitted = 0;
        loop {
            let Some(start) = Self::next_round_start(state) else {
                break;
            };
            // Starvation is judged on the medium clock
            if self.sweep_starved(state, start.min(now)) > 0 {
                continue;
            }
            if start > now {
                break;
            }

            let winner = state
                .queue
                .iter()
                .find(|(_, queued)| queued.ready_at <= start)
                .map(|(key, _)| *key);
            let Some(key) = winner else {
                break;
            };
            if let Some(queued) = state.queue.remove(&key) {
                tracing::trace!(can_id = %key.0, seq = key.1, contenders = state.queue.len() + 1, "arbitration won");
                self.transmit(state, queued, start);
                transmitted += 1;
            }
        }
        transmitted
    }

    /// `max(bus_free_at, earliest ready frame)`, `None` with an empty queue
    fn next_round_start(state: &BusState) -> Option<Instant> {
        let earliest = state.queue.values().map(|queued| queued.ready_at).min()?;
        Some(state.bus_free_at.map_or(earliest, |free| free.max(earliest)))
    }

    fn sweep_starved(&self, state: &mut BusState, horizon: Instant) -> usize {
        let mut starved: Vec<QueuedFrame> = Vec::new();
        while let Some(&(enqueued_at, id, seq)) = state.arrivals.front() {
            if !state.queue.contains_key(&(id, seq)) {
                // Already transmitted
                state.arrivals.pop_front();
                continue;
            }
            if horizon.saturating_duration_since(enqueued_at) <= self.config.max_queue_age {
                break;
            }
            state.arrivals.pop_front();
            if let Some(queued) = state.queue.remove(&(id, seq)) {
                starved.push(queued);
            }
        }

        let legitimate = starved.iter().filter(|q| !q.wire.origin.is_attacker()).count();
        let quiet = state
            .last_starvation_warning
            .is_some_and(|at| horizon.saturating_duration_since(at) < STARVATION_WARNING_INTERVAL);
        if legitimate > 0 && !quiet {
            state.last_starvation_warning = Some(horizon);
            tracing::warn!(
                dropped = starved.len(),
                legitimate,
                max_age_ms = self.config.max_queue_age.as_millis() as u64,
                "frames starved in arbitration queue"
            );
        }
        for queued in &starved {
            state.counters.blocked += 1;
            self.monitor
                .record_rejection(&queued.wire.origin, queued.wire.id(), Rejection::Starved, horizon);
        }
        starved.len()
    }

    fn transmit(&self, state: &mut BusState, queued: QueuedFrame, start: Instant) {
        let id = queued.wire.id();
        let tx_time = self.config.transmission_time(queued.wire.wire_len());
        let end = start + tx_time;
        state.bus_free_at = Some(end);
        state.counters.transmitted += 1;
        state.counters.busy += tx_time;

        if let Some(taps) = state.taps.get_mut(&id) {
            taps.retain(|tap| tap.send(queued.wire.clone()).is_ok());
        }

        let mut report = TransmissionReport::default();
        if let Some(subscribers) = state.subscribers.get_mut(&id) {
            subscribers.retain(|subscriber| match self.pipeline.verify(&queued.wire, &queued.config) {
                Ok(opened) => {
                    let mut frame = opened.frame;
                    frame.enqueued_at = Some(queued.enqueued_at);
                    frame.delivered_at = Some(end + opened.cost);
                    let latency = frame.latency().unwrap_or_default();
                    let delivery = Delivery {
                        frame,
                        anomalous: queued.anomalous,
                    };
                    if subscriber.tx.send(delivery).is_err() {
                        // Receiver gone
                        return false;
                    }
                    report.delivered.push((subscriber.name.clone(), latency));
                    true
                }
                Err(rejection) => {
                    tracing::debug!(can_id = %id, subscriber = %subscriber.name, "subscriber rejected frame: {}", rejection);
                    report.rejected.push((subscriber.name.clone(), rejection));
                    true
                }
            });
        }
        state.counters.deliveries += report.delivered.len() as u64;

        self.monitor
            .record_transmission(&queued.wire.origin, id, &report, end);
    }

    pub fn queue_depth(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn stats(&self, now: Instant) -> BusSnapshot {
        let state = self.lock();
        BusSnapshot {
            transmitted: state.counters.transmitted,
            deliveries: state.counters.deliveries,
            blocked: state.counters.blocked,
            queue_depth: state.queue.len(),
            busy_us: state.counters.busy.as_micros() as u64,
            compromised: self.monitor.bus_compromised(now),
        }
    }

    /// Frames currently queued from `origin`
    pub fn queued_from(&self, origin: &Origin) -> usize {
        self.lock()
            .queue
            .values()
            .filter(|queued| &queued.wire.origin == origin)
            .count()
    }

    /// Arbitration driver: wakes on every request and every `driver_interval`
    pub fn spawn_driver(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let bus = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(bus.config.driver_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = bus.wakeup.notified() => {}
                    _ = ticker.tick() => {}
                }
                bus.pump(Instant::now());
            }
            tracing::debug!("bus driver stopped");
        })
    }
}

impl std::fmt::Debug for VirtualCanBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualCanBus").field("config", &self.config).finish()
    }
}
