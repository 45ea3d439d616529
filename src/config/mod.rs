//! Experiment configuration schema and builder
//!
//! This module provides:
//! - The typed schema of the `config.yaml` artifact
//! - The settings record that derives a consistent artifact atomically

mod builder;
mod schema;

pub use builder::{Accelerator, ExperimentSettings};
pub use schema::{
    CallbackSpec, ConfigError, DataSection, ExperimentConfig, GpuSelection, LoggerSpec,
    ModelSection, MonitorMode, TrainerSection, DEFAULT_CONFIG_FILENAME,
};
