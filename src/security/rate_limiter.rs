use crate::types::CanId;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Sliding-window rate limiter keyed by CAN identifier
///
/// Each identifier keeps the timestamps of its admitted frames inside the
/// trailing window. When the window is full the newest arrival is rejected
/// and not recorded, so older accepted traffic is never evicted early.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    threshold: usize,
    window: Duration,
    windows: HashMap<CanId, VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    pub fn new(threshold: usize, window: Duration) -> Self {
        Self {
            threshold,
            window,
            windows: HashMap::new(),
        }
    }

    /// Admit and record the frame, or refuse it without recording
    pub fn try_admit(&mut self, id: CanId, now: Instant) -> bool {
        let window = self.window;
        let timestamps = self.windows.entry(id).or_default();
        Self::evict_expired(timestamps, window, now);

        if timestamps.len() >= self.threshold {
            return false;
        }
        timestamps.push_back(now);
        true
    }

    /// Frames currently counted against `id`
    pub fn current_count(&self, id: CanId, now: Instant) -> usize {
        self.windows.get(&id).map_or(0, |timestamps| {
            timestamps
                .iter()
                .filter(|t| now.saturating_duration_since(**t) <= self.window)
                .count()
        })
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    // Timestamps exactly one window old still count
    fn evict_expired(timestamps: &mut VecDeque<Instant>, window: Duration, now: Instant) {
        while let Some(oldest) = timestamps.front() {
            if now.saturating_duration_since(*oldest) > window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::can_ids;

    #[test]
    fn test_threshold_boundary() {
        let mut limiter = SlidingWindowLimiter::new(5, Duration::from_secs(1));
        let t0 = Instant::now();

        for i in 0..5 {
            assert!(
                limiter.try_admit(can_ids::ENGINE_RPM, t0 + Duration::from_millis(i)),
                "Message {} should be allowed inside the threshold",
                i
            );
        }
        assert!(!limiter.try_admit(can_ids::ENGINE_RPM, t0 + Duration::from_millis(10)));
        assert_eq!(limiter.current_count(can_ids::ENGINE_RPM, t0 + Duration::from_millis(10)), 5);
    }

    #[test]
    fn test_window_reset_after_elapse() {
        let mut limiter = SlidingWindowLimiter::new(3, Duration::from_secs(1));
        let t0 = Instant::now();

        for _ in 0..3 {
            assert!(limiter.try_admit(can_ids::ENGINE_RPM, t0));
        }
        assert!(!limiter.try_admit(can_ids::ENGINE_RPM, t0 + Duration::from_millis(999)));
        assert!(limiter.try_admit(can_ids::ENGINE_RPM, t0 + Duration::from_millis(1001)));
    }

    #[test]
    fn test_rejected_frames_are_not_recorded() {
        let mut limiter = SlidingWindowLimiter::new(2, Duration::from_secs(1));
        let t0 = Instant::now();

        assert!(limiter.try_admit(can_ids::GEAR_POSITION, t0));
        assert!(limiter.try_admit(can_ids::GEAR_POSITION, t0 + Duration::from_millis(500)));
        // Hammering while full must not extend the blockade
        for ms in 501..1000 {
            assert!(!limiter.try_admit(can_ids::GEAR_POSITION, t0 + Duration::from_millis(ms)));
        }
        // First accepted frame expired, one slot free again
        assert!(limiter.try_admit(can_ids::GEAR_POSITION, t0 + Duration::from_millis(1001)));
    }

    #[test]
    fn test_identifiers_are_independent() {
        let mut limiter = SlidingWindowLimiter::new(1, Duration::from_secs(1));
        let t0 = Instant::now();

        assert!(limiter.try_admit(can_ids::HIGHEST_PRIORITY, t0));
        assert!(!limiter.try_admit(can_ids::HIGHEST_PRIORITY, t0));
        assert!(limiter.try_admit(can_ids::BRAKE_PRESSURE, t0));
    }
}
