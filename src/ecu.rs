use crate::can_bus::{Delivery, SendOutcome, VirtualCanBus};
use crate::config::NodeConfig;
use crate::error::SimError;
use crate::security::{SecurityPipeline, SharedSecurityConfig};
use crate::snapshot::SignalValue;
use crate::types::{CanId, Frame, Origin, can_ids, encoding};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const IDLE_RPM: u16 = 800;
const RPM_STEP: u16 = 50;
const MAX_RPM: u16 = 8000;
const BASE_ENGINE_TEMP: u16 = 85;

/// Application signal produced on an owned identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// Ramp by 50 rpm per cycle, back to idle above 8000 (u16 big-endian)
    EngineRpm,
    /// 85 °C plus 1 °C per 400 rpm of the node's current engine speed
    EngineTemp,
    /// Ramp by 5 % per cycle, modulo 100
    BrakePressure,
    /// Gears 1 to 6, one step per cycle
    GearCycle,
    Flag(bool),
    Constant(Vec<u8>),
}

impl SignalKind {
    /// Bytes the generator produces before padding to the declared length
    pub fn natural_len(&self) -> usize {
        match self {
            SignalKind::EngineRpm => 2,
            SignalKind::Constant(bytes) => bytes.len(),
            _ => 1,
        }
    }
}

/// Simulated plant state shared by the signals of one node
#[derive(Debug, Clone)]
struct PlantState {
    rpm: u16,
    brake_pressure: u8,
    gear: u8,
}

impl Default for PlantState {
    fn default() -> Self {
        Self {
            rpm: IDLE_RPM,
            brake_pressure: 0,
            gear: 1,
        }
    }
}

impl PlantState {
    fn sample(&mut self, kind: &SignalKind) -> Vec<u8> {
        match kind {
            SignalKind::EngineRpm => {
                self.rpm += RPM_STEP;
                if self.rpm > MAX_RPM {
                    self.rpm = IDLE_RPM;
                }
                encoding::encode_rpm(self.rpm).to_vec()
            }
            SignalKind::EngineTemp => {
                let temp = (BASE_ENGINE_TEMP + self.rpm / 400).min(u8::MAX as u16) as u8;
                encoding::encode_byte(temp).to_vec()
            }
            SignalKind::BrakePressure => {
                self.brake_pressure = (self.brake_pressure + 5) % 100;
                encoding::encode_byte(self.brake_pressure).to_vec()
            }
            SignalKind::GearCycle => {
                self.gear = self.gear % 6 + 1;
                encoding::encode_byte(self.gear).to_vec()
            }
            SignalKind::Flag(on) => encoding::encode_flag(*on).to_vec(),
            SignalKind::Constant(bytes) => bytes.clone(),
        }
    }
}

/// Value last received on a subscribed identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedValue {
    pub payload: Vec<u8>,
    pub anomalous: bool,
    pub origin: Origin,
}

/// What a node currently believes about the vehicle, published after every
/// send cycle and every delivery
#[derive(Debug, Clone, Default)]
pub struct EcuView {
    pub last_values: BTreeMap<CanId, ReceivedValue>,
    pub cycles: u64,
    pub frames_admitted: u64,
    pub frames_rejected: u64,
}

impl EcuView {
    pub fn signal_values(&self) -> Vec<SignalValue> {
        self.last_values
            .iter()
            .map(|(id, received)| SignalValue {
                id: *id,
                name: id.system_name(),
                raw: hex::encode(&received.payload),
                value: decode_value(*id, &received.payload),
            })
            .collect()
    }
}

/// Engineering value of a payload
pub fn decode_value(id: CanId, payload: &[u8]) -> f64 {
    match id {
        can_ids::ENGINE_RPM => encoding::decode_rpm(payload),
        _ => encoding::decode_byte(payload),
    }
}

enum Wake {
    Delivery(Delivery),
    Tick,
}

/// Electronic control unit
///
/// Sends one frame per owned identifier every period, protected under the
/// security configuration current at build time, and keeps its own view of
/// the subscribed identifiers. Sends are fire-and-forget.
pub struct Ecu {
    config: NodeConfig,
    plant: PlantState,
    origin: Origin,
    pipeline: Arc<SecurityPipeline>,
    security: SharedSecurityConfig,
    bus: Arc<VirtualCanBus>,
    inbox: mpsc::UnboundedReceiver<Delivery>,
    view: EcuView,
    view_tx: watch::Sender<EcuView>,
}

impl Ecu {
    /// Subscribes immediately so no delivery is missed before `spawn`
    pub fn new(
        config: NodeConfig,
        pipeline: Arc<SecurityPipeline>,
        security: SharedSecurityConfig,
        bus: Arc<VirtualCanBus>,
    ) -> (Self, watch::Receiver<EcuView>) {
        let inbox = bus.subscribe(config.name.clone(), &config.subscriptions);
        let (view_tx, view_rx) = watch::channel(EcuView::default());
        let origin = Origin::ecu(config.name.clone());
        let ecu = Self {
            config,
            plant: PlantState::default(),
            origin,
            pipeline,
            security,
            bus,
            inbox,
            view: EcuView::default(),
            view_tx,
        };
        (ecu, view_rx)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn view(&self) -> &EcuView {
        &self.view
    }

    /// One frame per owned identifier, in declaration order
    pub fn build_frames(&mut self) -> Result<Vec<Frame>, SimError> {
        let mut frames = Vec::with_capacity(self.config.owned.len());
        for signal in &self.config.owned {
            let mut payload = self.plant.sample(&signal.signal);
            if payload.len() > signal.len {
                return Err(SimError::PayloadLengthMismatch {
                    id: signal.id,
                    len: payload.len(),
                    expected: signal.len,
                });
            }
            payload.resize(signal.len, 0);
            frames.push(Frame::new(signal.id, payload, self.origin.clone())?);
        }
        Ok(frames)
    }

    /// Build, protect and submit this period's frames
    pub fn send_cycle(&mut self, now: Instant) -> Result<usize, SimError> {
        let config = self.security.snapshot();
        let frames = self.build_frames()?;
        let mut admitted = 0;

        for frame in &frames {
            let wire = self.pipeline.protect(frame, &config)?;
            match self.bus.request_send(wire, now) {
                SendOutcome::Queued { .. } => admitted += 1,
                SendOutcome::Rejected(_) => self.view.frames_rejected += 1,
            }
        }

        self.view.cycles += 1;
        self.view.frames_admitted += admitted as u64;
        self.publish();
        Ok(admitted)
    }

    pub fn on_delivery(&mut self, delivery: Delivery) {
        let id = delivery.frame.id();
        self.view.last_values.insert(
            id,
            ReceivedValue {
                payload: delivery.frame.payload().to_vec(),
                anomalous: delivery.anomalous,
                origin: delivery.frame.origin.clone(),
            },
        );
        self.publish();
    }

    /// Handle everything already delivered without waiting
    pub fn drain_inbox(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(delivery) = self.inbox.try_recv() {
            self.on_delivery(delivery);
            handled += 1;
        }
        handled
    }

    fn publish(&self) {
        // No receivers left is fine, the view is advisory
        let _ = self.view_tx.send(self.view.clone());
    }

    pub fn spawn(mut self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::info!(
                node = %self.config.name,
                period_ms = self.config.period.as_millis() as u64,
                criticality = self.config.criticality.as_str(),
                "ECU started"
            );

            loop {
                let wake = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    Some(delivery) = self.inbox.recv() => Wake::Delivery(delivery),
                    _ = ticker.tick() => Wake::Tick,
                };
                match wake {
                    Wake::Delivery(delivery) => self.on_delivery(delivery),
                    Wake::Tick => {
                        if let Err(e) = self.send_cycle(Instant::now()) {
                            tracing::warn!(node = %self.config.name, error = %e, "send cycle failed");
                        }
                    }
                }
            }
            tracing::info!(node = %self.config.name, cycles = self.view.cycles, "ECU stopped");
        })
    }
}
