//! # Prototypical Networks for Few-Shot Image Classification
//!
//! This library implements the episodic forward pass of Prototypical
//! Networks together with the experiment-configuration generator feeding an
//! external training loop.
//!
//! ## Overview
//!
//! Prototypical Networks classify a query example by comparing its embedding
//! against class prototypes (centroids) computed from a handful of labeled
//! support examples. Each batch stacks several such episodes:
//!
//! - the first `way * shot` samples of every task are support, class-major
//! - the remaining samples are queries, scored against the prototypes
//! - the output is raw logits; loss and softmax stay with the caller
//!
//! The configuration side derives a consistent `config.yaml` artifact
//! (trainer, data and model sections) from a small set of experiment knobs.
//!
//! ## Modules
//!
//! - `network` - Backbones, the prototype head and scoring metrics
//! - `model` - The model wrapper and its lifecycle interface
//! - `training` - Episode sampling, schedules and evaluation
//! - `config` - Experiment configuration schema and builder
//! - `utils` - Classification metrics
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use protonet_fewshot::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     // Write the experiment configuration artifact
//!     let config = ExperimentSettings::default().build()?;
//!     config.write_default()?;
//!
//!     // Build the model it describes and run one episodic forward
//!     let model = ProtoNet::from_model_section(&config.model)?;
//!     let logits = model.train_forward(&batch)?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod model;
pub mod network;
pub mod training;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    // Network components
    pub use crate::network::{build_backbone, Backbone, Metric, PrototypeHead};

    // Model components
    pub use crate::model::{
        FewShotHyperparams, FewShotModule, OptimType, OptimizerSettings, ProtoNet,
    };

    // Training components
    pub use crate::training::{
        DecayScheduler, EpisodeBatch, EpisodeSampler, EvalReport, Evaluator, FewShotDataset,
        LrSchedule, SamplerConfig,
    };

    // Configuration components
    pub use crate::config::{
        Accelerator, CallbackSpec, ConfigError, ExperimentConfig, ExperimentSettings,
        GpuSelection, LoggerSpec, MonitorMode,
    };

    // Metrics
    pub use crate::utils::{accuracy_from_logits, cross_entropy_from_logits, episode_labels};

    pub use crate::{FewShotError, Result};
}

/// Error types for the crate
#[derive(thiserror::Error, Debug)]
pub enum FewShotError {
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Unknown backbone: {0}")]
    UnknownBackbone(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),
}

pub type Result<T> = std::result::Result<T, FewShotError>;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
