use crate::security::SecurityMeasure;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Aggregate security counters
///
/// Written concurrently by the pipeline (crypto operations) and the monitor
/// (outcomes). Plain atomic increments: fields are not mutually consistent
/// at sub-frame granularity.
#[derive(Debug, Default)]
pub struct SecurityStats {
    attacks_detected: AtomicU64,
    attacks_blocked: AtomicU64,
    attacks_successful: AtomicU64,
    messages_encrypted: AtomicU64,
    messages_authenticated: AtomicU64,
    rate_limit_violations: AtomicU64,
    anomalies_detected: AtomicU64,
    starved_frames: AtomicU64,
    /// Last observed overhead per measure, microseconds
    overhead_us: [AtomicU64; 4],
}

impl SecurityStats {
    pub fn record_encryption(&self) {
        self.messages_encrypted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_authentication(&self) {
        self.messages_authenticated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_overhead(&self, measure: SecurityMeasure, cost: Duration) {
        self.overhead_us[measure.index()].store(cost.as_micros() as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_attack_detected(&self) {
        self.attacks_detected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_attack_blocked(&self) {
        self.attacks_blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_attack_successful(&self) {
        self.attacks_successful.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rate_limit_violation(&self) {
        self.rate_limit_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_anomaly(&self) {
        self.anomalies_detected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_starved(&self) {
        self.starved_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SecurityStatsSnapshot {
        let overhead = |measure: SecurityMeasure| self.overhead_us[measure.index()].load(Ordering::Relaxed);
        SecurityStatsSnapshot {
            attacks_detected: self.attacks_detected.load(Ordering::Relaxed),
            attacks_blocked: self.attacks_blocked.load(Ordering::Relaxed),
            attacks_successful: self.attacks_successful.load(Ordering::Relaxed),
            messages_encrypted: self.messages_encrypted.load(Ordering::Relaxed),
            messages_authenticated: self.messages_authenticated.load(Ordering::Relaxed),
            rate_limit_violations: self.rate_limit_violations.load(Ordering::Relaxed),
            anomalies_detected: self.anomalies_detected.load(Ordering::Relaxed),
            starved_frames: self.starved_frames.load(Ordering::Relaxed),
            overhead: OverheadBreakdown {
                encryption_us: overhead(SecurityMeasure::Encryption),
                authentication_us: overhead(SecurityMeasure::Authentication),
                rate_limiting_us: overhead(SecurityMeasure::RateLimiting),
                intrusion_detection_us: overhead(SecurityMeasure::IntrusionDetection),
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityStatsSnapshot {
    pub attacks_detected: u64,
    pub attacks_blocked: u64,
    pub attacks_successful: u64,
    pub messages_encrypted: u64,
    pub messages_authenticated: u64,
    pub rate_limit_violations: u64,
    pub anomalies_detected: u64,
    pub starved_frames: u64,
    pub overhead: OverheadBreakdown,
}

/// Last observed cost of each measure (real computation plus simulated HSM time)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverheadBreakdown {
    pub encryption_us: u64,
    pub authentication_us: u64,
    pub rate_limiting_us: u64,
    pub intrusion_detection_us: u64,
}

impl OverheadBreakdown {
    pub fn total_us(&self) -> u64 {
        self.encryption_us + self.authentication_us + self.rate_limiting_us + self.intrusion_detection_us
    }
}

/// Bounded rolling window of latency samples with a running sum
#[derive(Debug, Clone)]
pub struct LatencyWindow {
    samples: VecDeque<Duration>,
    capacity: usize,
    sum: Duration,
}

impl LatencyWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            sum: Duration::ZERO,
        }
    }

    pub fn push(&mut self, latency: Duration) {
        if self.samples.len() == self.capacity {
            if let Some(oldest) = self.samples.pop_front() {
                self.sum = self.sum.saturating_sub(oldest);
            }
        }
        self.samples.push_back(latency);
        self.sum += latency;
    }

    pub fn average(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            None
        } else {
            Some(self.sum / self.samples.len() as u32)
        }
    }

    pub fn max(&self) -> Option<Duration> {
        self.samples.iter().max().copied()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
