use crate::types::CanId;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Outcome of observing one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdsVerdict {
    /// Still inside the learning period, interval folded into the average
    Learning,

    /// No trustworthy baseline for this identifier, no judgment possible
    NoBaseline,

    /// Interval consistent with the frozen baseline
    Normal,

    /// Interval far below the baseline (advisory only)
    Anomalous { interval: Duration, baseline: Duration },
}

impl IdsVerdict {
    pub fn is_anomalous(&self) -> bool {
        matches!(self, IdsVerdict::Anomalous { .. })
    }
}

/// Per-identifier inter-arrival profile
#[derive(Debug, Clone, Default)]
struct IntervalProfile {
    last_seen: Option<Instant>,
    interval_sum: Duration,
    interval_count: u64,
    /// Written once when learning ends, `None` if too few samples were seen
    baseline: Option<Duration>,
    frozen: bool,
}

impl IntervalProfile {
    fn freeze(&mut self, min_samples: u64) {
        if self.frozen {
            return;
        }
        if self.interval_count >= min_samples.max(1) {
            self.baseline = Some(self.interval_sum / self.interval_count as u32);
        }
        self.frozen = true;
    }
}

/// Interval-based intrusion detector
///
/// The learning period starts with the first frame the detector sees. While
/// learning, every inter-arrival interval feeds a running average per
/// identifier. Afterwards each baseline is frozen and a frame whose interval
/// drops below `baseline / divisor` is flagged.
#[derive(Debug)]
pub struct IntrusionDetector {
    learning_period: Duration,
    divisor: u32,
    min_samples: u64,
    learning_started: Option<Instant>,
    profiles: HashMap<CanId, IntervalProfile>,
}

impl IntrusionDetector {
    pub fn new(learning_period: Duration, divisor: u32, min_samples: u64) -> Self {
        Self {
            learning_period,
            divisor: divisor.max(1),
            min_samples,
            learning_started: None,
            profiles: HashMap::new(),
        }
    }

    pub fn observe(&mut self, id: CanId, now: Instant) -> IdsVerdict {
        let started = *self.learning_started.get_or_insert(now);
        let learning = now.saturating_duration_since(started) < self.learning_period;

        let profile = self.profiles.entry(id).or_default();
        let interval = profile.last_seen.map(|last| now.saturating_duration_since(last));
        profile.last_seen = Some(now);

        if learning && !profile.frozen {
            if let Some(interval) = interval {
                profile.interval_sum += interval;
                profile.interval_count += 1;
            }
            return IdsVerdict::Learning;
        }

        profile.freeze(self.min_samples);

        match (profile.baseline, interval) {
            (Some(baseline), Some(interval)) if interval < baseline / self.divisor => {
                IdsVerdict::Anomalous { interval, baseline }
            }
            (Some(_), _) => IdsVerdict::Normal,
            (None, _) => IdsVerdict::NoBaseline,
        }
    }

    pub fn is_learning(&self, now: Instant) -> bool {
        match self.learning_started {
            Some(started) => now.saturating_duration_since(started) < self.learning_period,
            None => true,
        }
    }

    /// Frozen baseline for `id`, if one was learned
    pub fn baseline(&self, id: CanId) -> Option<Duration> {
        self.profiles.get(&id).and_then(|p| p.baseline)
    }

    /// Identifiers with a frozen baseline
    pub fn learned_ids(&self) -> usize {
        self.profiles.values().filter(|p| p.baseline.is_some()).count()
    }
}
