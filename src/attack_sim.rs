/// Attack Simulation
///
/// Adversarial bus participants. They contend for the same medium as the
/// ECUs but ignore node etiquette: no fixed period per identifier, no keys.
///
/// - Bus flooding: top-priority frames at sub-millisecond cadence
/// - Spoofing: forged values on safety-relevant identifiers
/// - Replay: passive capture of genuine frames, re-emitted in bursts
pub mod flooding;
pub mod replay;
pub mod session;
pub mod spoofing;

pub use flooding::FloodAttack;
pub use replay::ReplayAttack;
pub use session::{AttackManager, AttackSession};
pub use spoofing::SpoofAttack;

use crate::error::CommandError;
use crate::types::{CanId, WireFrame};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;

/// Attack kind enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AttackKind {
    #[serde(rename = "bus_flooding")]
    Flood,
    #[serde(rename = "spoofing")]
    Spoof,
    #[serde(rename = "replay")]
    Replay,
}

impl AttackKind {
    pub const ALL: [AttackKind; 3] = [AttackKind::Flood, AttackKind::Spoof, AttackKind::Replay];

    pub fn as_str(&self) -> &'static str {
        match self {
            AttackKind::Flood => "bus_flooding",
            AttackKind::Spoof => "spoofing",
            AttackKind::Replay => "replay",
        }
    }
}

impl fmt::Display for AttackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttackKind {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bus_flooding" => Ok(AttackKind::Flood),
            "spoofing" => Ok(AttackKind::Spoof),
            "replay" => Ok(AttackKind::Replay),
            other => Err(CommandError::UnknownAttack(other.to_string())),
        }
    }
}

/// Per-session outcome counters
///
/// `attempts` is bumped by the session for every emitted frame, the other
/// three by the monitor as outcomes come in.
#[derive(Debug, Default)]
pub struct AttackCounters {
    attempts: AtomicU64,
    delivered: AtomicU64,
    blocked: AtomicU64,
    detected: AtomicU64,
}

impl AttackCounters {
    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_blocked(&self) {
        self.blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_detected(&self) {
        self.detected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> AttackCountersSnapshot {
        AttackCountersSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
            detected: self.detected.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackCountersSnapshot {
    pub attempts: u64,
    pub delivered: u64,
    pub blocked: u64,
    pub detected: u64,
}

impl AttackCountersSnapshot {
    /// Delivered attempts, percent
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.delivered as f64 / self.attempts as f64 * 100.0
        }
    }

    /// Detected attempts, percent
    pub fn detection_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.detected as f64 / self.attempts as f64 * 100.0
        }
    }
}

/// Adversarial producer driven by its session's timer
pub trait AttackGenerator: Send {
    fn kind(&self) -> AttackKind;

    /// Identifiers the attack emits on
    fn target_ids(&self) -> Vec<CanId>;

    /// Timer period of the owning session
    fn cadence(&self) -> Duration;

    fn missed_tick_behavior(&self) -> MissedTickBehavior {
        MissedTickBehavior::Delay
    }

    /// Frames to emit at `now`
    fn tick(&mut self, now: Instant) -> Vec<WireFrame>;
}
