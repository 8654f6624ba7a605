//! Spoofing
//!
//! Forged values on the configured targets, one raw frame per target per
//! tick. Without the shared MAC key these never survive authentication.

use crate::attack_sim::{AttackGenerator, AttackKind};
use crate::config::SpoofConfig;
use crate::types::{CanId, Origin, WireFrame};
use std::time::{Duration, Instant};

pub struct SpoofAttack {
    config: SpoofConfig,
    origin: Origin,
}

impl SpoofAttack {
    pub fn new(config: SpoofConfig, session: u64) -> Self {
        Self {
            config,
            origin: Origin::Attacker {
                kind: AttackKind::Spoof,
                session,
            },
        }
    }
}

impl AttackGenerator for SpoofAttack {
    fn kind(&self) -> AttackKind {
        AttackKind::Spoof
    }

    fn target_ids(&self) -> Vec<CanId> {
        self.config.targets.iter().map(|t| t.id).collect()
    }

    fn cadence(&self) -> Duration {
        self.config.interval
    }

    fn tick(&mut self, _now: Instant) -> Vec<WireFrame> {
        self.config
            .targets
            .iter()
            .map(|target| WireFrame::raw(target.id, target.payload.clone(), self.origin.clone()))
            .collect()
    }
}
