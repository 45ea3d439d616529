//! Learning rate decay schedules
//!
//! The schedule kind is part of the experiment configuration vocabulary;
//! `LrSchedule` evaluates the per-epoch learning rate an external training
//! loop would apply.

use serde::{Deserialize, Serialize};

/// Supported decay schedule kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecayScheduler {
    /// Cosine annealing from the base rate down to zero over max_epochs
    Cosine,
    /// Multiplicative decay at explicitly listed epochs
    SpecifiedEpochs,
}

impl Default for DecayScheduler {
    fn default() -> Self {
        Self::Cosine
    }
}

/// Evaluated learning rate schedule
#[derive(Debug, Clone)]
pub struct LrSchedule {
    kind: DecayScheduler,
    base_lr: f64,
    /// Annealing horizon for the cosine kind
    max_epochs: usize,
    /// Decay epochs for the specified_epochs kind, kept sorted
    milestones: Vec<usize>,
    /// Multiplier applied at each milestone
    decay_power: f64,
}

impl LrSchedule {
    /// Cosine annealing: lr(e) = base * 0.5 * (1 + cos(pi * e / max_epochs))
    pub fn cosine(base_lr: f64, max_epochs: usize) -> Self {
        Self {
            kind: DecayScheduler::Cosine,
            base_lr,
            max_epochs,
            milestones: Vec::new(),
            decay_power: 1.0,
        }
    }

    /// Milestone decay: lr(e) = base * power^(number of milestones <= e)
    pub fn specified_epochs(base_lr: f64, mut milestones: Vec<usize>, decay_power: f64) -> Self {
        milestones.sort_unstable();
        milestones.dedup();
        Self {
            kind: DecayScheduler::SpecifiedEpochs,
            base_lr,
            max_epochs: 0,
            milestones,
            decay_power,
        }
    }

    /// Learning rate at a given epoch
    pub fn lr_at(&self, epoch: usize) -> f64 {
        match self.kind {
            DecayScheduler::Cosine => {
                let horizon = self.max_epochs.max(1) as f64;
                let progress = epoch as f64 / horizon;
                self.base_lr * 0.5 * (1.0 + (std::f64::consts::PI * progress).cos())
            }
            DecayScheduler::SpecifiedEpochs => {
                let passed = self.milestones.iter().filter(|&&m| m <= epoch).count();
                self.base_lr * self.decay_power.powi(passed as i32)
            }
        }
    }

    /// Learning rates for epochs 0..n_epochs
    pub fn schedule(&self, n_epochs: usize) -> Vec<f64> {
        (0..n_epochs).map(|epoch| self.lr_at(epoch)).collect()
    }

    pub fn kind(&self) -> DecayScheduler {
        self.kind
    }

    pub fn base_lr(&self) -> f64 {
        self.base_lr
    }
}
