// Simulation configuration
// Every section has defaults matching the reference vehicle, so an empty
// JSON object (or no file at all) yields a runnable simulation.

use crate::ecu::SignalKind;
use crate::error::ConfigError;
use crate::security::SecurityConfig;
use crate::types::{CanId, MAX_PAYLOAD_LEN, can_ids};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Bitrates commonly found on automotive CAN buses
const COMMON_BITRATES: [u32; 4] = [125_000, 250_000, 500_000, 1_000_000];

/// Below this many frames per window the limiter starts eating legitimate traffic
const MIN_SENSIBLE_RATE_THRESHOLD: usize = 10;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub bus: BusConfig,
    pub security: SecurityTuning,
    pub telemetry: TelemetryConfig,
    pub nodes: Vec<NodeConfig>,
    pub attacks: AttackTuning,
}

impl SimConfig {
    /// Reference vehicle: engine, brake, transmission and body ECUs
    pub fn reference_vehicle() -> Self {
        Self {
            nodes: default_nodes(),
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: SimConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Check hard constraints; soft oddities are only logged
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bus.bitrate == 0 {
            return Err(invalid("bus.bitrate", "must be greater than zero"));
        }
        if !COMMON_BITRATES.contains(&self.bus.bitrate) {
            tracing::warn!(
                bitrate = self.bus.bitrate,
                "unusual CAN bitrate (common: 125k, 250k, 500k, 1M)"
            );
        }
        if self.bus.max_queue_age.is_zero() {
            return Err(invalid("bus.max_queue_age", "must be greater than zero"));
        }
        if self.bus.driver_interval.is_zero() {
            return Err(invalid("bus.driver_interval", "must be greater than zero"));
        }

        if self.security.rate_limit_threshold == 0 {
            return Err(invalid("security.rate_limit_threshold", "must be greater than zero"));
        }
        if self.security.rate_limit_threshold < MIN_SENSIBLE_RATE_THRESHOLD {
            tracing::warn!(
                threshold = self.security.rate_limit_threshold,
                "rate limit threshold below 10 per window may block legitimate traffic"
            );
        }
        if self.security.rate_limit_window.is_zero() {
            return Err(invalid("security.rate_limit_window", "must be greater than zero"));
        }
        if self.security.ids_anomaly_divisor == 0 {
            return Err(invalid("security.ids_anomaly_divisor", "must be greater than zero"));
        }

        let thresholds = &self.telemetry.latency_thresholds;
        if thresholds.critical >= thresholds.safety || thresholds.safety >= thresholds.normal {
            return Err(ConfigError::ThresholdOrder {
                critical: thresholds.critical,
                safety: thresholds.safety,
                normal: thresholds.normal,
            });
        }

        let mut owners: HashMap<CanId, &str> = HashMap::new();
        for node in &self.nodes {
            if node.period.is_zero() {
                return Err(invalid("nodes.period", format!("{} has a zero period", node.name)));
            }
            for signal in &node.owned {
                if !signal.id.is_valid() {
                    return Err(invalid("nodes.owned.id", format!("{} is out of range", signal.id)));
                }
                if signal.len == 0 || signal.len > MAX_PAYLOAD_LEN {
                    return Err(invalid(
                        "nodes.owned.len",
                        format!("{} declares {} bytes (1..={})", signal.id, signal.len, MAX_PAYLOAD_LEN),
                    ));
                }
                if signal.signal.natural_len() > signal.len {
                    return Err(invalid(
                        "nodes.owned.signal",
                        format!(
                            "{} produces {} bytes, declared length is {}",
                            signal.id,
                            signal.signal.natural_len(),
                            signal.len
                        ),
                    ));
                }
                if let Some(first) = owners.insert(signal.id, &node.name) {
                    return Err(ConfigError::DuplicateOwner {
                        id: signal.id,
                        first: first.to_string(),
                        second: node.name.clone(),
                    });
                }
            }
        }

        if !self.attacks.flood.id.is_valid() {
            return Err(invalid("attacks.flood.id", format!("{} is out of range", self.attacks.flood.id)));
        }
        if self.attacks.flood.interval.is_zero() || self.attacks.spoof.interval.is_zero() {
            return Err(invalid("attacks", "attack intervals must be greater than zero"));
        }
        if self.attacks.flood.payload.len() > MAX_PAYLOAD_LEN {
            return Err(invalid("attacks.flood.payload", "longer than the bus MTU"));
        }
        if self.attacks.spoof.targets.iter().any(|t| !t.id.is_valid()) {
            return Err(invalid("attacks.spoof.targets", "identifier out of range"));
        }
        if self.attacks.spoof.targets.iter().any(|t| t.payload.len() > MAX_PAYLOAD_LEN) {
            return Err(invalid("attacks.spoof.targets", "payload longer than the bus MTU"));
        }
        if self.attacks.replay.burst_spacing.is_zero() || self.attacks.replay.burst_interval.is_zero() {
            return Err(invalid("attacks.replay", "burst spacing and interval must be greater than zero"));
        }
        if self.attacks.replay.buffer_size == 0 {
            return Err(invalid("attacks.replay.buffer_size", "must be greater than zero"));
        }

        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Bits per second
    pub bitrate: u32,
    /// SOF, arbitration, control, CRC, ACK, EOF and worst-case stuffing
    pub frame_overhead_bits: u32,
    /// Starvation bound for frames waiting in the arbitration queue
    #[serde(with = "duration_ms")]
    pub max_queue_age: Duration,
    /// Idle wake-up period of the arbitration driver
    #[serde(with = "duration_ms")]
    pub driver_interval: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            bitrate: 500_000,
            frame_overhead_bits: 64,
            max_queue_age: Duration::from_millis(100),
            driver_interval: Duration::from_millis(1),
        }
    }
}

impl BusConfig {
    /// Time the medium is occupied by a frame carrying `wire_len` bytes
    pub fn transmission_time(&self, wire_len: usize) -> Duration {
        let bits = self.frame_overhead_bits as u64 + 8 * wire_len as u64;
        Duration::from_nanos(bits * 1_000_000_000 / self.bitrate.max(1) as u64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityTuning {
    /// Measures enabled when the simulation starts
    pub initial: SecurityConfig,
    /// Frames per identifier admitted inside one window
    pub rate_limit_threshold: usize,
    #[serde(with = "duration_ms")]
    pub rate_limit_window: Duration,
    #[serde(with = "duration_ms")]
    pub ids_learning_period: Duration,
    /// Anomalous when the interval drops below baseline / divisor
    pub ids_anomaly_divisor: u32,
    /// Intervals required before a baseline is trusted
    pub ids_min_samples: u64,
    pub costs: ProcessingCosts,
}

impl Default for SecurityTuning {
    fn default() -> Self {
        Self {
            initial: SecurityConfig::default(),
            rate_limit_threshold: 50,
            rate_limit_window: Duration::from_secs(1),
            ids_learning_period: Duration::from_secs(2),
            ids_anomaly_divisor: 3,
            ids_min_samples: 10,
            costs: ProcessingCosts::default(),
        }
    }
}

/// Simulated HSM processing time per operation, added to latency accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingCosts {
    #[serde(with = "duration_us")]
    pub encrypt: Duration,
    #[serde(with = "duration_us")]
    pub decrypt: Duration,
    #[serde(with = "duration_us")]
    pub mac_sign: Duration,
    #[serde(with = "duration_us")]
    pub mac_verify: Duration,
}

impl Default for ProcessingCosts {
    fn default() -> Self {
        Self {
            encrypt: Duration::from_micros(500),
            decrypt: Duration::from_micros(500),
            mac_sign: Duration::from_micros(300),
            mac_verify: Duration::from_micros(300),
        }
    }
}

impl ProcessingCosts {
    pub fn zero() -> Self {
        Self {
            encrypt: Duration::ZERO,
            decrypt: Duration::ZERO,
            mac_sign: Duration::ZERO,
            mac_verify: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Latency samples kept per node for the rolling average
    pub latency_history: usize,
    /// Most recent samples exposed in a snapshot
    pub recent_samples: usize,
    /// Trailing window for health classification
    #[serde(with = "duration_ms")]
    pub health_window: Duration,
    /// How long attack events and log entries are retained
    #[serde(with = "duration_ms")]
    pub event_retention: Duration,
    pub latency_thresholds: LatencyThresholds,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            latency_history: 1000,
            recent_samples: 50,
            health_window: Duration::from_secs(5),
            event_retention: Duration::from_secs(10),
            latency_thresholds: LatencyThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyThresholds {
    #[serde(with = "duration_ms")]
    pub critical: Duration,
    #[serde(with = "duration_ms")]
    pub safety: Duration,
    #[serde(with = "duration_ms")]
    pub normal: Duration,
}

impl Default for LatencyThresholds {
    fn default() -> Self {
        Self {
            critical: Duration::from_millis(10),
            safety: Duration::from_millis(20),
            normal: Duration::from_millis(100),
        }
    }
}

/// Latency class of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criticality {
    /// Brakes, airbags
    Critical,
    /// Steering, ABS
    Safety,
    /// Telemetry, body controls
    Normal,
}

impl Criticality {
    /// Default class of the well-known identifiers
    pub fn for_id(id: CanId) -> Self {
        match id {
            can_ids::BRAKE_PRESSURE | can_ids::BRAKE_STATUS => Criticality::Critical,
            can_ids::STEERING_ANGLE | can_ids::ABS_STATUS => Criticality::Safety,
            _ => Criticality::Normal,
        }
    }

    pub fn threshold(&self, thresholds: &LatencyThresholds) -> Duration {
        match self {
            Criticality::Critical => thresholds.critical,
            Criticality::Safety => thresholds.safety,
            Criticality::Normal => thresholds.normal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Criticality::Critical => "critical",
            Criticality::Safety => "safety",
            Criticality::Normal => "normal",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    /// One frame per owned identifier is sent every period
    #[serde(with = "duration_ms")]
    pub period: Duration,
    pub criticality: Criticality,
    pub owned: Vec<SignalConfig>,
    #[serde(default)]
    pub subscriptions: Vec<CanId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    pub id: CanId,
    /// Fixed payload length for this identifier
    pub len: usize,
    pub signal: SignalKind,
}

fn default_nodes() -> Vec<NodeConfig> {
    vec![
        NodeConfig {
            name: "EngineECU".to_string(),
            period: Duration::from_millis(50),
            criticality: Criticality::Normal,
            owned: vec![
                SignalConfig {
                    id: can_ids::ENGINE_RPM,
                    len: 2,
                    signal: SignalKind::EngineRpm,
                },
                SignalConfig {
                    id: can_ids::ENGINE_TEMP,
                    len: 1,
                    signal: SignalKind::EngineTemp,
                },
            ],
            subscriptions: vec![can_ids::BRAKE_PRESSURE, can_ids::DOOR_LOCKS],
        },
        NodeConfig {
            name: "BrakeECU".to_string(),
            // 40 Hz keeps the brake identifiers below the default 50/s limit
            period: Duration::from_millis(25),
            criticality: Criticality::Critical,
            owned: vec![
                SignalConfig {
                    id: can_ids::BRAKE_PRESSURE,
                    len: 1,
                    signal: SignalKind::BrakePressure,
                },
                SignalConfig {
                    id: can_ids::BRAKE_STATUS,
                    len: 1,
                    signal: SignalKind::Constant(vec![1]),
                },
            ],
            subscriptions: vec![can_ids::ENGINE_RPM],
        },
        NodeConfig {
            name: "TransmissionECU".to_string(),
            period: Duration::from_millis(80),
            criticality: Criticality::Normal,
            owned: vec![SignalConfig {
                id: can_ids::GEAR_POSITION,
                len: 1,
                signal: SignalKind::GearCycle,
            }],
            subscriptions: vec![can_ids::ENGINE_RPM, can_ids::BRAKE_PRESSURE],
        },
        NodeConfig {
            name: "BodyECU".to_string(),
            period: Duration::from_millis(100),
            criticality: Criticality::Normal,
            owned: vec![
                SignalConfig {
                    id: can_ids::DOOR_LOCKS,
                    len: 1,
                    signal: SignalKind::Flag(true),
                },
                SignalConfig {
                    id: can_ids::LIGHTS,
                    len: 1,
                    signal: SignalKind::Flag(true),
                },
            ],
            subscriptions: vec![can_ids::ENGINE_RPM, can_ids::GEAR_POSITION],
        },
    ]
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AttackTuning {
    pub flood: FloodConfig,
    pub spoof: SpoofConfig,
    pub replay: ReplayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FloodConfig {
    pub id: CanId,
    #[serde(with = "duration_us")]
    pub interval: Duration,
    pub payload: Vec<u8>,
}

impl Default for FloodConfig {
    fn default() -> Self {
        Self {
            id: can_ids::HIGHEST_PRIORITY,
            // 10,000 frames per second
            interval: Duration::from_micros(100),
            payload: vec![0xFF; MAX_PAYLOAD_LEN],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpoofTarget {
    pub id: CanId,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpoofConfig {
    pub targets: Vec<SpoofTarget>,
    #[serde(with = "duration_ms")]
    pub interval: Duration,
}

impl Default for SpoofConfig {
    fn default() -> Self {
        Self {
            targets: vec![
                // Brake pressure = 0
                SpoofTarget {
                    id: can_ids::BRAKE_PRESSURE,
                    payload: vec![0x00],
                },
                // Doors unlocked
                SpoofTarget {
                    id: can_ids::DOOR_LOCKS,
                    payload: vec![0x00],
                },
                // Lights off
                SpoofTarget {
                    id: can_ids::LIGHTS,
                    payload: vec![0x00],
                },
            ],
            interval: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub targets: Vec<CanId>,
    pub buffer_size: usize,
    /// Longest passive capture phase before replaying whatever was captured
    #[serde(with = "duration_ms")]
    pub capture_window: Duration,
    pub burst_count: usize,
    #[serde(with = "duration_us")]
    pub burst_spacing: Duration,
    #[serde(with = "duration_ms")]
    pub burst_interval: Duration,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            targets: vec![can_ids::ENGINE_RPM, can_ids::GEAR_POSITION],
            buffer_size: 64,
            capture_window: Duration::from_secs(1),
            burst_count: 3,
            burst_spacing: Duration::from_millis(1),
            burst_interval: Duration::from_millis(100),
        }
    }
}

/// Durations as integer milliseconds
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Durations as integer microseconds
mod duration_us {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_micros() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_micros(u64::deserialize(deserializer)?))
    }
}
