//! Episodic data plumbing and evaluation
//!
//! This module provides:
//! - Episode batches, datasets and the seeded episode sampler
//! - Learning rate schedules
//! - The multi-round evaluation loop

mod episode;
mod evaluator;
mod scheduler;

pub use episode::{EpisodeBatch, EpisodeSampler, FewShotDataset, SamplerConfig};
pub use evaluator::{EvalReport, EvalRound, Evaluator};
pub use scheduler::{DecayScheduler, LrSchedule};
