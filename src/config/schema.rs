//! Typed schema of the experiment configuration artifact
//!
//! The artifact is one YAML document with top-level keys `is_test`,
//! `num_test`, `model_name`, `pre_trained_path` and the three sections
//! `trainer`, `data` and `model`. Field declaration order is the
//! serialization order, so identical configurations always produce
//! byte-identical files.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::model::OptimType;
use crate::network::Metric;
use crate::training::DecayScheduler;

/// Name of the artifact written into the working directory
pub const DEFAULT_CONFIG_FILENAME: &str = "config.yaml";

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error
    #[error("File error: {0}")]
    Io(#[from] std::io::Error),
    /// YAML serialization or parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    /// Settings that cannot produce a consistent configuration
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Comparison direction for the monitored metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorMode {
    Max,
    Min,
}

/// Device selection, either a plain count or an explicit id list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GpuSelection {
    Count(usize),
    Ids(Vec<usize>),
}

impl GpuSelection {
    /// Number of devices the selection refers to
    pub fn num_units(&self) -> usize {
        match self {
            GpuSelection::Count(n) => *n,
            GpuSelection::Ids(ids) => ids.len(),
        }
    }
}

/// Callback specification consumed by the external trainer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "init_args", rename_all = "snake_case")]
pub enum CallbackSpec {
    /// Log the learning rate at the given interval
    LearningRateMonitor { logging_interval: String },
    /// Save checkpoints tracking a monitored metric
    ModelCheckpoint {
        verbose: bool,
        save_last: bool,
        monitor: String,
        mode: MonitorMode,
    },
    /// Fix the random seed at the start of the run
    SetSeed { seed: u64 },
}

/// Logger specification consumed by the external trainer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "init_args", rename_all = "snake_case")]
pub enum LoggerSpec {
    /// Tensorboard event files under `save_dir/name/`
    Tensorboard { save_dir: String, name: String },
}

/// The `trainer` section of the artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerSection {
    /// Debugging mode running a single batch per phase
    pub fast_dev_run: bool,
    /// Distributed strategy name, absent on a single device
    pub strategy: Option<String>,
    /// Synchronize batch-norm statistics across devices
    pub sync_batchnorm: bool,
    /// Devices to run on
    pub gpus: GpuSelection,
    /// Checkpoint file to resume from
    pub resume_from_checkpoint: Option<String>,
    /// Maximum epochs to run
    pub max_epochs: usize,
    /// Functionalities added to the trainer
    pub callbacks: Vec<CallbackSpec>,
    /// Experiment logger
    pub logger: LoggerSpec,
    /// Keep the custom episodic sampler under distributed training
    pub replace_sampler: bool,
}

/// The `data` section of the artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSection {
    /// Dataset identity
    pub dataset_name: String,
    /// Root directory of the dataset images
    pub data_root: String,
    /// Sample episodic batches instead of plain class batches
    pub is_meta: bool,
    /// Loader worker count for training
    pub train_num_workers: usize,
    /// Loader worker count for validation and test
    pub val_num_workers: usize,
    /// Episodic tasks per training epoch
    pub train_num_task_per_epoch: usize,
    /// Episodic tasks per validation pass
    pub val_num_task: usize,
    /// Episodic tasks per test pass
    pub test_num_task: usize,
    /// Effective training batch size across devices
    pub train_batchsize: usize,
    /// Effective validation batch size across devices
    pub val_batchsize: usize,
    /// Effective test batch size across devices
    pub test_batchsize: usize,
    /// Classes per task
    pub way: usize,
    /// Support samples per class during training
    pub train_shot: usize,
    /// Support samples per class during validation
    pub val_shot: usize,
    /// Support samples per class during testing
    pub test_shot: usize,
    /// Query samples per class
    pub num_query: usize,
    /// Whether batches are sharded across distributed workers
    pub is_distributed: bool,
    /// Drop the trailing incomplete batch
    pub drop_last: bool,
}

/// The `model` section of the artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSection {
    /// Registry name of the feature extractor
    pub backbone_name: String,
    /// Learning rate after the accelerator adjustment
    pub lr: f64,
    /// Classes per task
    pub way: usize,
    /// Support samples per class during training
    pub train_shot: usize,
    /// Support samples per class during validation
    pub val_shot: usize,
    /// Support samples per class during testing
    pub test_shot: usize,
    /// Query samples per class
    pub num_query: usize,
    /// Tasks per device in one training step
    pub train_batch_size_per_gpu: usize,
    /// Tasks per device in one validation step
    pub val_batch_size_per_gpu: usize,
    /// Tasks per device in one test step
    pub test_batch_size_per_gpu: usize,
    /// L2 penalty applied by the optimizer
    pub weight_decay: f64,
    /// Learning rate decay kind
    pub decay_scheduler: DecayScheduler,
    /// Optimizer family
    pub optim_type: OptimType,
    /// Decay epochs, only present for the specified_epochs scheduler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decay_epochs: Option<Vec<usize>>,
    /// Multiplier applied at each decay epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decay_power: Option<f64>,
    /// Metric used by the classification head
    pub metric: Metric,
    /// Logit scale of the classification head
    pub scale_cls: f64,
}

/// The complete experiment configuration artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Run the test loop instead of training
    pub is_test: bool,
    /// Evaluation rounds in test mode
    pub num_test: usize,
    /// Model identity consumed by the trainer
    pub model_name: String,
    /// Checkpoint to initialize weights from
    pub pre_trained_path: Option<String>,
    /// Trainer section
    pub trainer: TrainerSection,
    /// Data section
    pub data: DataSection,
    /// Model section
    pub model: ModelSection,
}

impl ExperimentConfig {
    /// Serialize as a block-style YAML document
    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Write the artifact to the given path, overwriting prior content
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = self.to_yaml_string()?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Write the artifact as `config.yaml` in the current working directory
    pub fn write_default(&self) -> Result<(), ConfigError> {
        self.write_to(DEFAULT_CONFIG_FILENAME)
    }

    /// Read an artifact back from a YAML file
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Parse an artifact from a YAML string
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_selection_units() {
        assert_eq!(GpuSelection::Count(3).num_units(), 3);
        assert_eq!(GpuSelection::Ids(vec![1, 2]).num_units(), 2);
    }

    #[test]
    fn test_gpu_selection_serializes_untagged() {
        let ids = serde_yaml::to_string(&GpuSelection::Ids(vec![1, 2])).unwrap();
        assert_eq!(ids.trim(), "- 1\n- 2");

        let count = serde_yaml::to_string(&GpuSelection::Count(3)).unwrap();
        assert_eq!(count.trim(), "3");
    }

    #[test]
    fn test_gpu_selection_parses_both_forms() {
        let count: GpuSelection = serde_yaml::from_str("2").unwrap();
        assert_eq!(count, GpuSelection::Count(2));

        let ids: GpuSelection = serde_yaml::from_str("[1, 2]").unwrap();
        assert_eq!(ids, GpuSelection::Ids(vec![1, 2]));
    }

    #[test]
    fn test_callback_spec_kind_and_init_args() {
        let spec = CallbackSpec::LearningRateMonitor {
            logging_interval: "step".to_string(),
        };
        let yaml = serde_yaml::to_string(&spec).unwrap();
        assert!(yaml.contains("kind: learning_rate_monitor"));
        assert!(yaml.contains("init_args:"));
        assert!(yaml.contains("logging_interval: step"));

        let parsed: CallbackSpec = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, spec);
    }

    #[test]
    fn test_checkpoint_callback_mode_is_lowercase() {
        let spec = CallbackSpec::ModelCheckpoint {
            verbose: true,
            save_last: true,
            monitor: "val/acc".to_string(),
            mode: MonitorMode::Max,
        };
        let yaml = serde_yaml::to_string(&spec).unwrap();
        assert!(yaml.contains("kind: model_checkpoint"));
        assert!(yaml.contains("mode: max"));
    }

    #[test]
    fn test_logger_spec_shape() {
        let spec = LoggerSpec::Tensorboard {
            save_dir: "../results/".to_string(),
            name: "ProtoNet".to_string(),
        };
        let yaml = serde_yaml::to_string(&spec).unwrap();
        assert!(yaml.contains("kind: tensorboard"));
        assert!(yaml.contains("save_dir: ../results/"));
        assert!(yaml.contains("name: ProtoNet"));
    }
}
