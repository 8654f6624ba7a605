use crate::types::CanId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};

/// Node health, derived by the monitor and never self-assigned
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Warning,
    Compromised,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthState::Healthy => write!(f, "healthy"),
            HealthState::Warning => write!(f, "warning"),
            HealthState::Compromised => write!(f, "compromised"),
        }
    }
}

/// What happened to an attacker frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttackOutcome {
    Delivered,
    Blocked,
    Detected,
}

/// Attack-related events inside the trailing window, counted per outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCounts {
    pub delivered: u64,
    pub blocked: u64,
    pub detected: u64,
}

impl EventCounts {
    pub fn total(&self) -> u64 {
        self.delivered + self.blocked + self.detected
    }
}

/// Attacker outcomes per identifier, pruned to the health window
#[derive(Debug)]
pub struct AttackEventLog {
    window: Duration,
    per_id: HashMap<CanId, VecDeque<(Instant, AttackOutcome)>>,
    last_delivery: Option<Instant>,
}

impl AttackEventLog {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            per_id: HashMap::new(),
            last_delivery: None,
        }
    }

    pub fn record(&mut self, id: CanId, outcome: AttackOutcome, now: Instant) {
        let window = self.window;
        let events = self.per_id.entry(id).or_default();
        while let Some((at, _)) = events.front() {
            if now.saturating_duration_since(*at) > window {
                events.pop_front();
            } else {
                break;
            }
        }
        events.push_back((now, outcome));

        if outcome == AttackOutcome::Delivered {
            self.last_delivery = Some(now);
        }
    }

    /// Events on any of `ids` within the window ending at `now`
    pub fn counts<'a>(&self, ids: impl IntoIterator<Item = &'a CanId>, now: Instant) -> EventCounts {
        let mut counts = EventCounts::default();
        for id in ids {
            let Some(events) = self.per_id.get(id) else {
                continue;
            };
            for (at, outcome) in events.iter().rev() {
                if now.saturating_duration_since(*at) > self.window {
                    break;
                }
                match outcome {
                    AttackOutcome::Delivered => counts.delivered += 1,
                    AttackOutcome::Blocked => counts.blocked += 1,
                    AttackOutcome::Detected => counts.detected += 1,
                }
            }
        }
        counts
    }

    /// An attacker frame reached the medium recently, whoever listened
    pub fn delivery_within_window(&self, now: Instant) -> bool {
        self.last_delivery
            .is_some_and(|at| now.saturating_duration_since(at) <= self.window)
    }
}

/// Classification over the trailing window
///
/// Compromised beats warning beats healthy.
pub fn classify(counts: &EventCounts, own_frames_starved: bool) -> HealthState {
    if counts.delivered > 0 {
        HealthState::Compromised
    } else if counts.blocked > 0 || counts.detected > 0 || own_frames_starved {
        HealthState::Warning
    } else {
        HealthState::Healthy
    }
}
