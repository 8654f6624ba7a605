//! Replay
//!
//! Two phases. While capturing, a passive tap stores genuine wire frames
//! (security envelope included) in a bounded buffer. Once every target has
//! been seen, or the capture window ran out with something in the buffer,
//! the latest capture per target is re-emitted verbatim in short bursts.

use crate::attack_sim::{AttackGenerator, AttackKind};
use crate::config::ReplayConfig;
use crate::types::{CanId, Origin, WireFrame};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayPhase {
    Capturing { since: Option<Instant> },
    Replaying,
}

pub struct ReplayAttack {
    config: ReplayConfig,
    origin: Origin,
    capture: mpsc::UnboundedReceiver<WireFrame>,
    captured_frames: VecDeque<WireFrame>,
    phase: ReplayPhase,
    /// Scheduled burst copies, due time ascending
    pending: VecDeque<(Instant, WireFrame)>,
    next_burst: Option<Instant>,
}

impl ReplayAttack {
    /// `capture` is a bus tap on `config.targets`
    pub fn new(config: ReplayConfig, session: u64, capture: mpsc::UnboundedReceiver<WireFrame>) -> Self {
        Self {
            captured_frames: VecDeque::with_capacity(config.buffer_size),
            config,
            origin: Origin::Attacker {
                kind: AttackKind::Replay,
                session,
            },
            capture,
            phase: ReplayPhase::Capturing { since: None },
            pending: VecDeque::new(),
            next_burst: None,
        }
    }

    /// Capture a frame for later replay, oldest evicted when full
    pub fn capture_frame(&mut self, frame: WireFrame) {
        if self.captured_frames.len() >= self.config.buffer_size {
            self.captured_frames.pop_front();
        }
        self.captured_frames.push_back(frame);
    }

    pub fn captured_count(&self) -> usize {
        self.captured_frames.len()
    }

    pub fn phase(&self) -> ReplayPhase {
        self.phase
    }

    fn latest_capture(&self, id: CanId) -> Option<&WireFrame> {
        self.captured_frames.iter().rev().find(|frame| frame.id() == id)
    }

    fn drain_capture(&mut self) {
        while let Ok(frame) = self.capture.try_recv() {
            self.capture_frame(frame);
        }
    }

    fn ready_to_replay(&self, since: Instant, now: Instant) -> bool {
        if self.captured_frames.is_empty() {
            return false;
        }
        let all_seen = self.config.targets.iter().all(|id| self.latest_capture(*id).is_some());
        all_seen || now.saturating_duration_since(since) >= self.config.capture_window
    }

    fn schedule_burst(&mut self, now: Instant) {
        let mut burst = Vec::new();
        for id in &self.config.targets {
            if let Some(frame) = self.latest_capture(*id) {
                burst.push(frame.with_origin(self.origin.clone()));
            }
        }
        for copy in 0..self.config.burst_count {
            let due = now + self.config.burst_spacing * copy as u32;
            for frame in &burst {
                self.pending.push_back((due, frame.clone()));
            }
        }
    }
}

impl AttackGenerator for ReplayAttack {
    fn kind(&self) -> AttackKind {
        AttackKind::Replay
    }

    fn target_ids(&self) -> Vec<CanId> {
        self.config.targets.clone()
    }

    fn cadence(&self) -> Duration {
        self.config.burst_spacing
    }

    fn tick(&mut self, now: Instant) -> Vec<WireFrame> {
        // Keep listening in both phases so replays use fresh captures
        self.drain_capture();

        if let ReplayPhase::Capturing { since } = self.phase {
            let since = since.unwrap_or(now);
            if !self.ready_to_replay(since, now) {
                self.phase = ReplayPhase::Capturing { since: Some(since) };
                return Vec::new();
            }
            tracing::info!(
                captured = self.captured_frames.len(),
                targets = self.config.targets.len(),
                "replay capture complete, switching to replay"
            );
            self.phase = ReplayPhase::Replaying;
        }

        if self.next_burst.is_none_or(|due| now >= due) {
            self.schedule_burst(now);
            self.next_burst = Some(now + self.config.burst_interval);
        }

        let mut emitted = Vec::new();
        while let Some((due, _)) = self.pending.front() {
            if *due > now {
                break;
            }
            if let Some((_, frame)) = self.pending.pop_front() {
                emitted.push(frame);
            }
        }
        emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::can_ids;

    fn genuine(id: CanId, byte: u8) -> WireFrame {
        WireFrame::raw(id, vec![byte], Origin::ecu("EngineECU"))
    }

    #[test]
    fn test_capture_buffer_is_bounded() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let config = ReplayConfig {
            buffer_size: 3,
            ..ReplayConfig::default()
        };
        let mut replay = ReplayAttack::new(config, 1, rx);
        for byte in 0..5 {
            replay.capture_frame(genuine(can_ids::ENGINE_RPM, byte));
        }
        assert_eq!(replay.captured_count(), 3);
        assert_eq!(replay.latest_capture(can_ids::ENGINE_RPM).unwrap().payload, vec![4]);
    }

    #[test]
    fn test_stays_silent_while_capturing() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut replay = ReplayAttack::new(ReplayConfig::default(), 1, rx);
        let t0 = Instant::now();

        assert!(replay.tick(t0).is_empty());
        tx.send(genuine(can_ids::ENGINE_RPM, 1)).unwrap();
        // Only one of two targets seen, capture window still open
        assert!(replay.tick(t0 + Duration::from_millis(10)).is_empty());
        assert!(matches!(replay.phase(), ReplayPhase::Capturing { .. }));

        // Window elapsed with something captured
        let frames = replay.tick(t0 + Duration::from_secs(1));
        assert_eq!(replay.phase(), ReplayPhase::Replaying);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_burst_of_three_with_tight_spacing() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut replay = ReplayAttack::new(ReplayConfig::default(), 5, rx);
        tx.send(genuine(can_ids::ENGINE_RPM, 7)).unwrap();
        tx.send(genuine(can_ids::GEAR_POSITION, 3)).unwrap();
        let t0 = Instant::now();

        let mut emitted = Vec::new();
        for ms in 0..100 {
            let now = t0 + Duration::from_millis(ms);
            for frame in replay.tick(now) {
                emitted.push((ms, frame));
            }
        }

        // 2 targets x 3 copies at 0, 1 and 2 ms
        assert_eq!(emitted.len(), 6);
        assert_eq!(emitted.iter().map(|(ms, _)| *ms).max(), Some(2));
        for (_, frame) in &emitted {
            assert_eq!(
                frame.origin,
                Origin::Attacker {
                    kind: AttackKind::Replay,
                    session: 5
                }
            );
        }

        // Next burst one interval later
        assert_eq!(replay.tick(t0 + Duration::from_millis(100)).len(), 2);
    }

    #[test]
    fn test_replay_is_verbatim() {
        let (tx, rx) = mpsc::unbounded_channel();
        let config = ReplayConfig {
            targets: vec![can_ids::ENGINE_RPM],
            ..ReplayConfig::default()
        };
        let mut replay = ReplayAttack::new(config, 1, rx);
        let mut original = genuine(can_ids::ENGINE_RPM, 9);
        original.envelope.mac = Some([0xAB; 32]);
        tx.send(original.clone()).unwrap();

        let frames = replay.tick(Instant::now());
        assert_eq!(frames[0].payload, original.payload);
        assert_eq!(frames[0].envelope, original.envelope);
        assert_ne!(frames[0].origin, original.origin);
    }
}
