//! Security pipeline
//!
//! Four independently toggleable measures applied to every frame:
//!
//! 1. Confidentiality: AES-256-GCM over the payload, fresh nonce per frame
//! 2. Authenticity: HMAC-SHA256 over identifier, nonce and (encrypted) payload
//! 3. Rate limiting: sliding window per identifier at bus admission
//! 4. Intrusion detection: advisory interval check, never blocks
//!
//! `protect` runs on the sender. `unprotect` runs once at bus admission and
//! is the only place that touches the stateful measures. `verify` repeats the
//! symmetric-key checks for every subscriber after arbitration.

pub mod crypto;
pub mod ids;
pub mod rate_limiter;

pub use crypto::KeyMaterial;
pub use ids::{IdsVerdict, IntrusionDetector};
pub use rate_limiter::SlidingWindowLimiter;

use crate::config::{ProcessingCosts, SecurityTuning};
use crate::error::{CommandError, Rejection, SimError};
use crate::telemetry::SecurityStats;
use crate::types::{CanId, Frame, SecurityEnvelope, WireFrame};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMeasure {
    Encryption,
    Authentication,
    RateLimiting,
    IntrusionDetection,
}

impl SecurityMeasure {
    pub const ALL: [SecurityMeasure; 4] = [
        SecurityMeasure::Encryption,
        SecurityMeasure::Authentication,
        SecurityMeasure::RateLimiting,
        SecurityMeasure::IntrusionDetection,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityMeasure::Encryption => "encryption",
            SecurityMeasure::Authentication => "authentication",
            SecurityMeasure::RateLimiting => "rate_limiting",
            SecurityMeasure::IntrusionDetection => "intrusion_detection",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            SecurityMeasure::Encryption => 0,
            SecurityMeasure::Authentication => 1,
            SecurityMeasure::RateLimiting => 2,
            SecurityMeasure::IntrusionDetection => 3,
        }
    }
}

impl FromStr for SecurityMeasure {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "encryption" => Ok(SecurityMeasure::Encryption),
            "authentication" => Ok(SecurityMeasure::Authentication),
            "rate_limiting" => Ok(SecurityMeasure::RateLimiting),
            "intrusion_detection" | "ids" => Ok(SecurityMeasure::IntrusionDetection),
            other => Err(CommandError::UnknownMeasure(other.to_string())),
        }
    }
}

impl fmt::Display for SecurityMeasure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One flag per measure. Copied once per frame so a pipeline run never
/// observes a half-applied toggle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub encryption: bool,
    pub authentication: bool,
    pub rate_limiting: bool,
    pub intrusion_detection: bool,
}

impl SecurityConfig {
    pub fn all_enabled() -> Self {
        Self {
            encryption: true,
            authentication: true,
            rate_limiting: true,
            intrusion_detection: true,
        }
    }

    pub fn only(measure: SecurityMeasure) -> Self {
        let mut config = Self::default();
        config.set(measure, true);
        config
    }

    pub fn is_enabled(&self, measure: SecurityMeasure) -> bool {
        match measure {
            SecurityMeasure::Encryption => self.encryption,
            SecurityMeasure::Authentication => self.authentication,
            SecurityMeasure::RateLimiting => self.rate_limiting,
            SecurityMeasure::IntrusionDetection => self.intrusion_detection,
        }
    }

    pub fn set(&mut self, measure: SecurityMeasure, enabled: bool) {
        match measure {
            SecurityMeasure::Encryption => self.encryption = enabled,
            SecurityMeasure::Authentication => self.authentication = enabled,
            SecurityMeasure::RateLimiting => self.rate_limiting = enabled,
            SecurityMeasure::IntrusionDetection => self.intrusion_detection = enabled,
        }
    }
}

/// Security configuration shared between the control surface (writer) and
/// every pipeline invocation (readers)
#[derive(Debug, Clone, Default)]
pub struct SharedSecurityConfig {
    inner: Arc<RwLock<SecurityConfig>>,
}

impl SharedSecurityConfig {
    pub fn new(initial: SecurityConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    pub fn snapshot(&self) -> SecurityConfig {
        *self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the previous state of the measure
    pub fn set(&self, measure: SecurityMeasure, enabled: bool) -> bool {
        let mut config = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let previous = config.is_enabled(measure);
        config.set(measure, enabled);
        previous
    }
}

/// Stateful per-identifier security state, owned by the bus
#[derive(Debug)]
pub struct SecurityStore {
    pub limiter: SlidingWindowLimiter,
    pub ids: IntrusionDetector,
}

impl SecurityStore {
    pub fn new(tuning: &SecurityTuning) -> Self {
        Self {
            limiter: SlidingWindowLimiter::new(tuning.rate_limit_threshold, tuning.rate_limit_window),
            ids: IntrusionDetector::new(
                tuning.ids_learning_period,
                tuning.ids_anomaly_divisor,
                tuning.ids_min_samples,
            ),
        }
    }
}

/// Frame recovered by the symmetric-key checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opened {
    pub frame: Frame,
    /// Simulated receiver processing time
    pub cost: Duration,
}

/// Frame that passed bus admission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unprotected {
    pub frame: Frame,
    pub anomalous: bool,
    pub cost: Duration,
}

/// Sender and receiver side of the security measures
///
/// Every legitimate node shares one pipeline (and thus one `KeyMaterial`).
pub struct SecurityPipeline {
    keys: KeyMaterial,
    costs: ProcessingCosts,
    stats: Arc<SecurityStats>,
}

impl SecurityPipeline {
    pub fn new(keys: KeyMaterial, costs: ProcessingCosts, stats: Arc<SecurityStats>) -> Self {
        Self { keys, costs, stats }
    }

    pub fn keys(&self) -> &KeyMaterial {
        &self.keys
    }

    /// Build the wire representation of `frame` under `config`
    pub fn protect(&self, frame: &Frame, config: &SecurityConfig) -> Result<WireFrame, SimError> {
        let id = frame.id();
        let mut payload = frame.payload().to_vec();
        let mut envelope = SecurityEnvelope::default();
        let mut cost = Duration::ZERO;

        if config.encryption {
            let start = Instant::now();
            let nonce = crypto::fresh_nonce();
            payload = crypto::encrypt_aes256_gcm(&payload, self.keys.encryption_key(), &nonce, &id_bytes(id))?;
            envelope.nonce = Some(nonce);
            cost += self.costs.encrypt;
            self.stats.record_encryption();
            self.stats
                .record_overhead(SecurityMeasure::Encryption, start.elapsed() + self.costs.encrypt);
        }

        if config.authentication {
            let start = Instant::now();
            let tag = crypto::generate_mac(&mac_input(id, &envelope, &payload), self.keys.mac_key())?;
            envelope.mac = Some(tag);
            cost += self.costs.mac_sign;
            self.stats.record_authentication();
            self.stats
                .record_overhead(SecurityMeasure::Authentication, start.elapsed() + self.costs.mac_sign);
        }

        Ok(WireFrame::sealed(id, payload, envelope, frame.origin.clone(), cost, *config))
    }

    /// Symmetric-key checks only: authenticity, then confidentiality
    ///
    /// Stateless, so every subscriber may run it independently.
    pub fn verify(&self, wire: &WireFrame, config: &SecurityConfig) -> Result<Opened, Rejection> {
        let id = wire.id();
        let mut cost = Duration::ZERO;

        if config.authentication {
            let tag = wire.envelope.mac.as_ref().ok_or(Rejection::InvalidMac)?;
            crypto::verify_mac(&mac_input(id, &wire.envelope, &wire.payload), tag, self.keys.mac_key())?;
            cost += self.costs.mac_verify;
        }

        let payload = match (&wire.envelope.nonce, config.encryption) {
            (Some(nonce), true) => {
                cost += self.costs.decrypt;
                crypto::decrypt_aes256_gcm(&wire.payload, self.keys.encryption_key(), nonce, &id_bytes(id))?
            }
            (None, true) => return Err(Rejection::InvalidEncryption),
            // Built while encryption was on, measure switched off in flight:
            // the envelope still says how to read it
            (Some(nonce), false) => {
                match crypto::decrypt_aes256_gcm(&wire.payload, self.keys.encryption_key(), nonce, &id_bytes(id)) {
                    Ok(plaintext) => {
                        cost += self.costs.decrypt;
                        plaintext
                    }
                    Err(_) => wire.payload.clone(),
                }
            }
            (None, false) => wire.payload.clone(),
        };

        Ok(Opened {
            frame: Frame::assemble(id, payload, wire.origin.clone()),
            cost,
        })
    }

    /// Full inbound pipeline at the bus admission boundary
    ///
    /// Any rejection short-circuits. Disabled stateful stages leave `store`
    /// untouched.
    pub fn unprotect(
        &self,
        wire: &WireFrame,
        config: &SecurityConfig,
        store: &mut SecurityStore,
        now: Instant,
    ) -> Result<Unprotected, Rejection> {
        let opened = self.verify(wire, config)?;
        let id = wire.id();

        if config.rate_limiting {
            let start = Instant::now();
            let admitted = store.limiter.try_admit(id, now);
            self.stats
                .record_overhead(SecurityMeasure::RateLimiting, start.elapsed());
            if !admitted {
                return Err(Rejection::RateExceeded);
            }
        }

        let mut anomalous = false;
        if config.intrusion_detection {
            let start = Instant::now();
            let verdict = store.ids.observe(id, now);
            self.stats
                .record_overhead(SecurityMeasure::IntrusionDetection, start.elapsed());
            if let IdsVerdict::Anomalous { interval, baseline } = verdict {
                tracing::debug!(
                    can_id = %id,
                    interval_us = interval.as_micros() as u64,
                    baseline_us = baseline.as_micros() as u64,
                    "interval anomaly"
                );
                anomalous = true;
            }
        }

        Ok(Unprotected {
            frame: opened.frame,
            anomalous,
            cost: opened.cost,
        })
    }
}

impl fmt::Debug for SecurityPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityPipeline")
            .field("keys", &self.keys)
            .field("costs", &self.costs)
            .finish()
    }
}

/// Associated data binding ciphertext and tag to the identifier
fn id_bytes(id: CanId) -> [u8; 5] {
    let [a, b, c, d] = id.value().to_be_bytes();
    let extended = matches!(id, CanId::Extended(_)) as u8;
    [extended, a, b, c, d]
}

fn mac_input(id: CanId, envelope: &SecurityEnvelope, payload: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(5 + 12 + payload.len());
    data.extend_from_slice(&id_bytes(id));
    if let Some(nonce) = &envelope.nonce {
        data.extend_from_slice(nonce);
    }
    data.extend_from_slice(payload);
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attack_sim::AttackKind;
    use crate::config::SecurityTuning;
    use crate::types::{Origin, can_ids};

    fn pipeline(seed: u64) -> SecurityPipeline {
        SecurityPipeline::new(
            KeyMaterial::from_seed(seed),
            ProcessingCosts::default(),
            Arc::new(SecurityStats::default()),
        )
    }

    fn brake_frame() -> Frame {
        Frame::new(can_ids::BRAKE_PRESSURE, vec![42], Origin::ecu("BrakeECU")).unwrap()
    }

    #[test]
    fn test_measure_names() {
        assert_eq!("ids".parse::<SecurityMeasure>().unwrap(), SecurityMeasure::IntrusionDetection);
        assert_eq!(
            "rate_limiting".parse::<SecurityMeasure>().unwrap(),
            SecurityMeasure::RateLimiting
        );
        assert!(matches!(
            "firewall".parse::<SecurityMeasure>(),
            Err(CommandError::UnknownMeasure(_))
        ));
        for measure in SecurityMeasure::ALL {
            assert_eq!(measure.as_str().parse::<SecurityMeasure>().unwrap(), measure);
        }
    }

    #[test]
    fn test_shared_config_snapshot_is_a_copy() {
        let shared = SharedSecurityConfig::default();
        let before = shared.snapshot();
        assert!(!shared.set(SecurityMeasure::Authentication, true));
        assert!(!before.authentication);
        assert!(shared.snapshot().authentication);
    }

    #[test]
    fn test_all_disabled_is_identity() {
        let pipeline = pipeline(1);
        let config = SecurityConfig::default();
        let frame = brake_frame();

        let wire = pipeline.protect(&frame, &config).unwrap();
        assert!(wire.envelope.is_empty());
        assert_eq!(wire.payload, vec![42]);

        let opened = pipeline.verify(&wire, &config).unwrap();
        assert_eq!(opened.frame, frame);
        assert_eq!(opened.cost, Duration::ZERO);
    }

    #[test]
    fn test_full_protection_round_trip() {
        let pipeline = pipeline(1);
        let config = SecurityConfig::all_enabled();
        let frame = brake_frame();

        let wire = pipeline.protect(&frame, &config).unwrap();
        assert!(wire.envelope.nonce.is_some());
        assert!(wire.envelope.mac.is_some());
        assert_ne!(wire.payload, vec![42]);
        assert_eq!(wire.protect_cost, Duration::from_micros(800));

        let mut store = SecurityStore::new(&SecurityTuning::default());
        let result = pipeline.unprotect(&wire, &config, &mut store, Instant::now()).unwrap();
        assert_eq!(result.frame.payload(), &[42]);
        assert!(!result.anomalous);
        assert_eq!(result.cost, Duration::from_micros(800));
    }

    #[test]
    fn test_unauthenticated_frame_rejected_with_invalid_mac() {
        let pipeline = pipeline(1);
        let wire = WireFrame::raw(
            can_ids::BRAKE_PRESSURE,
            vec![0x00],
            Origin::Attacker {
                kind: AttackKind::Spoof,
                session: 1,
            },
        );
        assert_eq!(
            pipeline.verify(&wire, &SecurityConfig::only(SecurityMeasure::Authentication)),
            Err(Rejection::InvalidMac)
        );
    }

    #[test]
    fn test_foreign_key_rejected() {
        let legit = pipeline(1);
        let attacker = pipeline(2);
        let wire = attacker
            .protect(&brake_frame(), &SecurityConfig::only(SecurityMeasure::Encryption))
            .unwrap();
        assert_eq!(
            legit.verify(&wire, &SecurityConfig::only(SecurityMeasure::Encryption)),
            Err(Rejection::InvalidEncryption)
        );
    }

    #[test]
    fn test_mac_binds_identifier() {
        let pipeline = pipeline(1);
        let config = SecurityConfig::only(SecurityMeasure::Authentication);
        let wire = pipeline.protect(&brake_frame(), &config).unwrap();

        let mut moved = WireFrame::raw(can_ids::HIGHEST_PRIORITY, wire.payload.clone(), wire.origin.clone());
        moved.envelope = wire.envelope.clone();
        assert_eq!(pipeline.verify(&moved, &config), Err(Rejection::InvalidMac));
    }

    #[test]
    fn test_replayed_frame_passes_symmetric_checks() {
        let pipeline = pipeline(1);
        let config = SecurityConfig {
            encryption: true,
            authentication: true,
            ..SecurityConfig::default()
        };
        let wire = pipeline.protect(&brake_frame(), &config).unwrap();
        let replayed = wire.with_origin(Origin::Attacker {
            kind: AttackKind::Replay,
            session: 3,
        });
        for _ in 0..3 {
            assert_eq!(pipeline.verify(&replayed, &config).unwrap().frame.payload(), &[42]);
        }
    }

    #[test]
    fn test_disabled_rate_limiter_records_nothing() {
        let pipeline = pipeline(1);
        let mut store = SecurityStore::new(&SecurityTuning::default());
        let wire = pipeline.protect(&brake_frame(), &SecurityConfig::default()).unwrap();
        let t0 = Instant::now();

        for _ in 0..100 {
            pipeline
                .unprotect(&wire, &SecurityConfig::default(), &mut store, t0)
                .unwrap();
        }
        assert_eq!(store.limiter.current_count(can_ids::BRAKE_PRESSURE, t0), 0);

        let limited = SecurityConfig::only(SecurityMeasure::RateLimiting);
        assert!(pipeline.unprotect(&wire, &limited, &mut store, t0).is_ok());
    }

    #[test]
    fn test_in_flight_frame_survives_encryption_toggle_off() {
        let pipeline = pipeline(1);
        let wire = pipeline
            .protect(&brake_frame(), &SecurityConfig::only(SecurityMeasure::Encryption))
            .unwrap();
        let opened = pipeline.verify(&wire, &SecurityConfig::default()).unwrap();
        assert_eq!(opened.frame.payload(), &[42]);
    }

    #[test]
    fn test_protect_counts_crypto_operations() {
        let stats = Arc::new(SecurityStats::default());
        let pipeline = SecurityPipeline::new(KeyMaterial::from_seed(1), ProcessingCosts::zero(), stats.clone());
        let config = SecurityConfig::all_enabled();
        for _ in 0..4 {
            pipeline.protect(&brake_frame(), &config).unwrap();
        }
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.messages_encrypted, 4);
        assert_eq!(snapshot.messages_authenticated, 4);
    }
}
