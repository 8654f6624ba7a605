use crate::attack_sim::AttackKind;
use crate::error::SimError;
use crate::security::SecurityConfig;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::time::{Duration, Instant};

/// Largest payload a classical CAN frame carries
pub const MAX_PAYLOAD_LEN: usize = 8;

/// AES-GCM nonce carried in the envelope
pub const NONCE_LEN: usize = 12;

/// HMAC-SHA256 tag carried in the envelope
pub const MAC_LEN: usize = 32;

/// CAN Frame identifier (11-bit standard or 29-bit extended)
///
/// The identifier doubles as the arbitration priority: a numerically lower
/// value wins the bus. On equal base values a standard frame beats an
/// extended one, as the IDE bit is recessive on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CanId {
    Standard(u16), // 11-bit (0x000 - 0x7FF)
    Extended(u32), // 29-bit (0x00000000 - 0x1FFFFFFF)
}

impl CanId {
    pub fn value(&self) -> u32 {
        match self {
            CanId::Standard(id) => *id as u32,
            CanId::Extended(id) => *id,
        }
    }

    pub fn is_valid(&self) -> bool {
        match self {
            CanId::Standard(id) => *id <= 0x7FF,
            CanId::Extended(id) => *id <= 0x1FFF_FFFF,
        }
    }

    /// Human-readable name of the vehicle function behind this identifier
    pub fn system_name(&self) -> String {
        let name = match *self {
            can_ids::ENGINE_RPM => "Engine RPM",
            can_ids::ENGINE_TEMP => "Engine Temperature",
            can_ids::BRAKE_PRESSURE => "Brake Pressure (CRITICAL)",
            can_ids::BRAKE_STATUS => "Brake Status (CRITICAL)",
            can_ids::GEAR_POSITION => "Transmission Gear",
            can_ids::DOOR_LOCKS => "Door Locks",
            can_ids::LIGHTS => "Headlights/Taillights",
            can_ids::STEERING_ANGLE => "Steering Angle (SAFETY)",
            can_ids::ABS_STATUS => "ABS Status (SAFETY)",
            can_ids::OBD_REQUEST => "OBD-II Request",
            can_ids::OBD_RESPONSE => "OBD-II Response",
            other => return format!("Unknown ID ({})", other),
        };
        name.to_string()
    }

    fn is_extended(&self) -> bool {
        matches!(self, CanId::Extended(_))
    }
}

impl Ord for CanId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value()
            .cmp(&other.value())
            .then(self.is_extended().cmp(&other.is_extended()))
    }
}

impl PartialOrd for CanId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for CanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanId::Standard(id) => write!(f, "0x{:03X}", id),
            CanId::Extended(id) => write!(f, "0x{:08X}", id),
        }
    }
}

/// Standard CAN IDs of the simulated vehicle
pub mod can_ids {
    use super::CanId;

    // Reserved top priority, never used by a legitimate ECU
    pub const HIGHEST_PRIORITY: CanId = CanId::Standard(0x000);

    // Brake system (critical, < 10 ms)
    pub const BRAKE_PRESSURE: CanId = CanId::Standard(0x0A0);
    pub const BRAKE_STATUS: CanId = CanId::Standard(0x0A1);

    // Steering & ABS (safety, < 20 ms)
    pub const STEERING_ANGLE: CanId = CanId::Standard(0x0C0);
    pub const ABS_STATUS: CanId = CanId::Standard(0x0C1);

    // Engine control
    pub const ENGINE_RPM: CanId = CanId::Standard(0x100);
    pub const ENGINE_TEMP: CanId = CanId::Standard(0x101);

    // Transmission
    pub const GEAR_POSITION: CanId = CanId::Standard(0x200);

    // Body control
    pub const DOOR_LOCKS: CanId = CanId::Standard(0x300);
    pub const LIGHTS: CanId = CanId::Standard(0x301);

    // OBD-II diagnostics
    pub const OBD_REQUEST: CanId = CanId::Standard(0x7DF);
    pub const OBD_RESPONSE: CanId = CanId::Standard(0x7E8);
}

/// Who put a frame on the bus. Used for health attribution only, never
/// part of the bytes on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    Ecu(String),
    Attacker { kind: AttackKind, session: u64 },
}

impl Origin {
    pub fn ecu(name: impl Into<String>) -> Self {
        Origin::Ecu(name.into())
    }

    pub fn is_attacker(&self) -> bool {
        matches!(self, Origin::Attacker { .. })
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Ecu(name) => write!(f, "{}", name),
            Origin::Attacker { kind, session } => write!(f, "ATTACKER[{} #{}]", kind, session),
        }
    }
}

/// Application-level CAN frame
///
/// `enqueued_at` and `delivered_at` belong to the bus: senders leave them
/// empty and the bus stamps them on admission and on delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    id: CanId,
    payload: Vec<u8>,
    pub origin: Origin,
    pub enqueued_at: Option<Instant>,
    pub delivered_at: Option<Instant>,
}

impl Frame {
    pub fn new(id: CanId, payload: Vec<u8>, origin: Origin) -> Result<Self, SimError> {
        if !id.is_valid() {
            return Err(SimError::InvalidId(id));
        }
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(SimError::PayloadTooLong {
                id,
                len: payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }
        Ok(Self {
            id,
            payload,
            origin,
            enqueued_at: None,
            delivered_at: None,
        })
    }

    /// Frame recovered from the wire, where the identifier was already
    /// validated and the payload length is whatever the sender put there
    pub(crate) fn assemble(id: CanId, payload: Vec<u8>, origin: Origin) -> Self {
        Self {
            id,
            payload,
            origin,
            enqueued_at: None,
            delivered_at: None,
        }
    }

    pub fn id(&self) -> CanId {
        self.id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Queueing + transmission + processing time, once the bus stamped both ends
    pub fn latency(&self) -> Option<Duration> {
        match (self.enqueued_at, self.delivered_at) {
            (Some(enqueued), Some(delivered)) => Some(delivered.saturating_duration_since(enqueued)),
            _ => None,
        }
    }
}

/// Material added by the security transforms
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityEnvelope {
    pub nonce: Option<[u8; NONCE_LEN]>,
    pub mac: Option<[u8; MAC_LEN]>,
}

impl SecurityEnvelope {
    pub fn is_empty(&self) -> bool {
        self.nonce.is_none() && self.mac.is_none()
    }

    pub fn len(&self) -> usize {
        self.nonce.map_or(0, |_| NONCE_LEN) + self.mac.map_or(0, |_| MAC_LEN)
    }
}

/// A frame as it travels on the bus: possibly encrypted payload plus envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireFrame {
    id: CanId,
    pub payload: Vec<u8>,
    pub envelope: SecurityEnvelope,
    pub origin: Origin,
    /// Simulated sender-side processing time spent building the envelope
    pub protect_cost: Duration,
    /// Configuration the envelope was built under, checked again at admission
    pub built_under: Option<SecurityConfig>,
}

impl WireFrame {
    /// Frame put on the wire as-is, without any envelope
    pub fn raw(id: CanId, payload: Vec<u8>, origin: Origin) -> Self {
        Self {
            id,
            payload,
            envelope: SecurityEnvelope::default(),
            origin,
            protect_cost: Duration::ZERO,
            built_under: None,
        }
    }

    pub(crate) fn sealed(
        id: CanId,
        payload: Vec<u8>,
        envelope: SecurityEnvelope,
        origin: Origin,
        protect_cost: Duration,
        built_under: SecurityConfig,
    ) -> Self {
        Self {
            id,
            payload,
            envelope,
            origin,
            protect_cost,
            built_under: Some(built_under),
        }
    }

    pub fn id(&self) -> CanId {
        self.id
    }

    /// Bytes occupied on the medium (payload plus envelope)
    pub fn wire_len(&self) -> usize {
        self.payload.len() + self.envelope.len()
    }

    /// Verbatim copy of the wire content attributed to another sender.
    /// The copy is checked under whatever configuration is current when it
    /// is sent.
    pub fn with_origin(&self, origin: Origin) -> Self {
        Self {
            origin,
            built_under: None,
            ..self.clone()
        }
    }
}

/// Helper functions for encoding/decoding vehicle signals
pub mod encoding {
    /// Engine RPM as raw big-endian u16
    pub fn encode_rpm(rpm: u16) -> [u8; 2] {
        rpm.to_be_bytes()
    }

    pub fn decode_rpm(data: &[u8]) -> f64 {
        if data.len() < 2 {
            return 0.0;
        }
        u16::from_be_bytes([data[0], data[1]]) as f64
    }

    /// Single-byte quantities: temperature (°C), pressure (%), gear, flags
    pub fn encode_byte(value: u8) -> [u8; 1] {
        [value]
    }

    pub fn decode_byte(data: &[u8]) -> f64 {
        data.first().map_or(0.0, |b| *b as f64)
    }

    pub fn encode_flag(on: bool) -> [u8; 1] {
        [on as u8]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lower_id_has_higher_priority() {
        assert!(can_ids::HIGHEST_PRIORITY < can_ids::BRAKE_PRESSURE);
        assert!(can_ids::BRAKE_PRESSURE < can_ids::ENGINE_RPM);
        assert!(CanId::Standard(0x100) < CanId::Extended(0x100));
        assert!(CanId::Extended(0x0FF) < CanId::Standard(0x100));
    }

    #[test]
    fn test_frame_rejects_oversized_payload() {
        let result = Frame::new(can_ids::ENGINE_RPM, vec![0; 9], Origin::ecu("EngineECU"));
        assert!(matches!(result, Err(SimError::PayloadTooLong { len: 9, .. })));
    }

    #[test]
    fn test_frame_rejects_out_of_range_id() {
        let result = Frame::new(CanId::Standard(0x800), vec![1], Origin::ecu("EngineECU"));
        assert!(matches!(result, Err(SimError::InvalidId(_))));
    }

    #[test]
    fn test_envelope_length() {
        let mut envelope = SecurityEnvelope::default();
        assert!(envelope.is_empty());
        envelope.nonce = Some([0; NONCE_LEN]);
        assert_eq!(envelope.len(), 12);
        envelope.mac = Some([0; MAC_LEN]);
        assert_eq!(envelope.len(), 44);
    }

    #[test]
    fn test_with_origin_keeps_wire_content() {
        let wire = WireFrame::raw(can_ids::GEAR_POSITION, vec![3], Origin::ecu("TransmissionECU"));
        let replayed = wire.with_origin(Origin::Attacker {
            kind: AttackKind::Replay,
            session: 7,
        });
        assert_eq!(replayed.id(), wire.id());
        assert_eq!(replayed.payload, wire.payload);
        assert!(replayed.origin.is_attacker());
        assert!(replayed.built_under.is_none());
    }

    #[test]
    fn test_rpm_encoding() {
        let bytes = encoding::encode_rpm(3000);
        assert_eq!(bytes, [0x0B, 0xB8]);
        assert_eq!(encoding::decode_rpm(&bytes), 3000.0);
    }

    #[test]
    fn test_system_names() {
        assert_eq!(can_ids::BRAKE_PRESSURE.system_name(), "Brake Pressure (CRITICAL)");
        assert_eq!(CanId::Standard(0x555).system_name(), "Unknown ID (0x555)");
    }
}
