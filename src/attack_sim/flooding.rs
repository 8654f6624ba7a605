//! Bus flooding (DoS)
//!
//! One raw frame per tick on the top-priority identifier. Missed ticks are
//! burst out to hold the configured frame rate even when the runtime timer
//! is coarser than the cadence.

use crate::attack_sim::{AttackGenerator, AttackKind};
use crate::config::FloodConfig;
use crate::types::{CanId, Origin, WireFrame};
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;

pub struct FloodAttack {
    config: FloodConfig,
    origin: Origin,
    emitted: u64,
}

impl FloodAttack {
    pub fn new(config: FloodConfig, session: u64) -> Self {
        Self {
            config,
            origin: Origin::Attacker {
                kind: AttackKind::Flood,
                session,
            },
            emitted: 0,
        }
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }
}

impl AttackGenerator for FloodAttack {
    fn kind(&self) -> AttackKind {
        AttackKind::Flood
    }

    fn target_ids(&self) -> Vec<CanId> {
        vec![self.config.id]
    }

    fn cadence(&self) -> Duration {
        self.config.interval
    }

    fn missed_tick_behavior(&self) -> MissedTickBehavior {
        MissedTickBehavior::Burst
    }

    fn tick(&mut self, _now: Instant) -> Vec<WireFrame> {
        self.emitted += 1;
        vec![WireFrame::raw(self.config.id, self.config.payload.clone(), self.origin.clone())]
    }
}
