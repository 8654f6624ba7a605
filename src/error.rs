//! Error types for the bus simulation.
//!
//! Two very different families live here:
//!
//! - [`Rejection`] is an *expected* outcome of normal contention. A frame that
//!   fails a security stage or ages out of the arbitration queue is rejected,
//!   reported to the monitor and forgotten. Rejections never abort the bus.
//! - [`CommandError`], [`ConfigError`] and [`SimError`] are real errors:
//!   a malformed command from the control surface, an invalid configuration,
//!   or a frame that cannot be constructed.

use crate::types::CanId;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Why a frame was not delivered
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    /// Ciphertext failed to decrypt under the shared key (or was missing)
    #[error("invalid_encryption")]
    InvalidEncryption,

    /// Authentication tag missing or not matching the shared key
    #[error("invalid_mac")]
    InvalidMac,

    /// Sliding-window threshold exceeded for the identifier
    #[error("rate_exceeded")]
    RateExceeded,

    /// Frame aged out of the arbitration queue without winning
    #[error("starved")]
    Starved,
}

impl Rejection {
    pub fn stage(&self) -> RejectionStage {
        match self {
            Rejection::InvalidEncryption => RejectionStage::Encryption,
            Rejection::InvalidMac => RejectionStage::Authentication,
            Rejection::RateExceeded => RejectionStage::RateLimiting,
            Rejection::Starved => RejectionStage::Arbitration,
        }
    }

    /// Rejected by one of the security measures (as opposed to the medium)
    pub fn is_security(&self) -> bool {
        !matches!(self, Rejection::Starved)
    }
}

/// Stage of the frame path that produced a rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionStage {
    Encryption,
    Authentication,
    RateLimiting,
    Arbitration,
}

impl fmt::Display for RejectionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionStage::Encryption => write!(f, "encryption"),
            RejectionStage::Authentication => write!(f, "authentication"),
            RejectionStage::RateLimiting => write!(f, "rate_limiting"),
            RejectionStage::Arbitration => write!(f, "arbitration"),
        }
    }
}

/// Control-surface command that could not be applied. State is left unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error(
        "unknown security measure '{0}' (expected one of: encryption, authentication, rate_limiting, intrusion_detection)"
    )]
    UnknownMeasure(String),

    #[error("unknown attack kind '{0}' (expected one of: bus_flooding, spoofing, replay)")]
    UnknownAttack(String),

    #[error("simulation is not running")]
    NotRunning,
}

/// Invalid simulation configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("latency thresholds must satisfy critical < safety < normal (got {critical:?}, {safety:?}, {normal:?})")]
    ThresholdOrder {
        critical: std::time::Duration,
        safety: std::time::Duration,
        normal: std::time::Duration,
    },

    #[error("identifier {id} is owned by both {first} and {second}")]
    DuplicateOwner {
        id: CanId,
        first: String,
        second: String,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read configuration file {path}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Top-level error type
#[derive(Error, Debug)]
pub enum SimError {
    #[error("identifier {0} is out of range")]
    InvalidId(CanId),

    #[error("payload for {id} is {len} bytes, bus MTU is {max}")]
    PayloadTooLong { id: CanId, len: usize, max: usize },

    #[error("payload for {id} is {len} bytes, identifier is declared with {expected}")]
    PayloadLengthMismatch { id: CanId, len: usize, expected: usize },

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_names_match_taxonomy() {
        assert_eq!(Rejection::InvalidEncryption.to_string(), "invalid_encryption");
        assert_eq!(Rejection::InvalidMac.to_string(), "invalid_mac");
        assert_eq!(Rejection::RateExceeded.to_string(), "rate_exceeded");
        assert_eq!(Rejection::Starved.to_string(), "starved");
    }

    #[test]
    fn test_rejection_stage() {
        assert_eq!(Rejection::InvalidMac.stage(), RejectionStage::Authentication);
        assert_eq!(Rejection::Starved.stage(), RejectionStage::Arbitration);
        assert!(Rejection::RateExceeded.is_security());
        assert!(!Rejection::Starved.is_security());
    }

    #[test]
    fn test_command_error_is_descriptive() {
        let err = CommandError::UnknownMeasure("firewall".to_string());
        assert!(err.to_string().contains("firewall"));
        assert!(err.to_string().contains("rate_limiting"));
    }
}
