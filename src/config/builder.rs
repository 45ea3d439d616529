//! Experiment settings and the configuration build step
//!
//! [`ExperimentSettings`] holds the small set of independent knobs an
//! experiment is described by. [`ExperimentSettings::build`] validates them
//! and applies every derivation rule at once, so the resulting
//! [`ExperimentConfig`] is internally consistent by construction: effective
//! batch sizes, the accelerator block, the learning-rate adjustment and the
//! callback list can never disagree with each other.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::schema::{
    CallbackSpec, ConfigError, DataSection, ExperimentConfig, GpuSelection, LoggerSpec,
    ModelSection, MonitorMode, TrainerSection,
};
use crate::model::OptimType;
use crate::network::Metric;
use crate::training::DecayScheduler;

/// Accelerator setup switched as one unit.
///
/// Strategy name, batch-norm synchronization and the device list always
/// come from the same variant, so a single-device run can never carry
/// distributed settings and vice versa.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Accelerator {
    /// One device, no distributed strategy
    SingleUnit(GpuSelection),
    /// Two or more devices under distributed data parallel
    MultiUnit(GpuSelection),
}

impl Accelerator {
    /// Single-device setup on the given GPU id
    pub fn single(gpu_id: usize) -> Self {
        Accelerator::SingleUnit(GpuSelection::Ids(vec![gpu_id]))
    }

    /// Multi-device setup on the given GPU ids
    pub fn multi(gpu_ids: Vec<usize>) -> Self {
        Accelerator::MultiUnit(GpuSelection::Ids(gpu_ids))
    }

    /// Number of devices in the setup
    pub fn num_units(&self) -> usize {
        self.gpus().num_units()
    }

    /// The underlying device selection
    pub fn gpus(&self) -> &GpuSelection {
        match self {
            Accelerator::SingleUnit(gpus) => gpus,
            Accelerator::MultiUnit(gpus) => gpus,
        }
    }

    /// Distributed strategy name handed to the trainer
    pub fn strategy(&self) -> Option<String> {
        match self {
            Accelerator::SingleUnit(_) => None,
            Accelerator::MultiUnit(_) => Some("ddp".to_string()),
        }
    }

    /// Whether batch-norm statistics are synchronized across devices
    pub fn sync_batchnorm(&self) -> bool {
        matches!(self, Accelerator::MultiUnit(_))
    }

    /// Whether batches are sharded across distributed workers
    pub fn is_distributed(&self) -> bool {
        matches!(self, Accelerator::MultiUnit(_))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let GpuSelection::Ids(ids) = self.gpus() {
            if ids.is_empty() {
                return Err(ConfigError::Invalid("GPU id list is empty".to_string()));
            }
        }
        match self {
            Accelerator::SingleUnit(gpus) if gpus.num_units() != 1 => Err(ConfigError::Invalid(
                format!("single-unit setup needs exactly 1 device, got {}", gpus.num_units()),
            )),
            Accelerator::MultiUnit(gpus) if gpus.num_units() < 2 => Err(ConfigError::Invalid(
                format!("multi-unit setup needs at least 2 devices, got {}", gpus.num_units()),
            )),
            _ => Ok(()),
        }
    }
}

impl Default for Accelerator {
    fn default() -> Self {
        Accelerator::multi(vec![1, 2])
    }
}

/// Top-level knobs an experiment configuration is derived from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSettings {
    /// Accelerator setup
    pub accelerator: Accelerator,
    /// Seed fixed at the start of the run
    pub seed: u64,
    /// Logging root, experiment output lands in `log_dir/exp_name/`
    pub log_dir: String,
    /// Experiment name
    pub exp_name: String,
    /// Model identity consumed by the trainer
    pub model_name: String,
    /// Run the test loop instead of training
    pub is_test: bool,
    /// Evaluation rounds in test mode
    pub num_test: usize,
    /// Checkpoint to initialize weights from
    pub pre_trained_path: Option<String>,
    /// Checkpoint file to resume training from
    pub resume_from_checkpoint: Option<String>,
    /// Debugging mode running a single batch per phase
    pub fast_dev_run: bool,
    /// Maximum epochs to run
    pub max_epochs: usize,
    /// Keep the custom episodic sampler under distributed training
    pub replace_sampler: bool,
    /// Tasks per device in one training step
    pub per_gpu_train_batchsize: usize,
    /// Tasks per device in one validation step
    pub per_gpu_val_batchsize: usize,
    /// Tasks per device in one test step
    pub per_gpu_test_batchsize: usize,
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
    /// Base learning rate of the multi-device setup
    pub lr: f64,
    /// L2 penalty applied by the optimizer
    pub weight_decay: f64,
    /// Learning rate decay kind
    pub decay_scheduler: DecayScheduler,
    /// Decay epochs, required by the specified_epochs scheduler
    pub decay_epochs: Option<Vec<usize>>,
    /// Multiplier applied at each decay epoch
    pub decay_power: Option<f64>,
    /// Optimizer family
    pub optim_type: OptimType,
    /// Metric used by the classification head
    pub metric: Metric,
    /// Logit scale of the classification head
    pub scale_cls: f64,
    /// Registry name of the feature extractor
    pub backbone_name: String,
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
    /// Drop the trailing incomplete batch
    pub drop_last: bool,
    /// Metric name watched by the checkpoint callback
    pub monitor: String,
    /// Comparison direction of the monitored metric
    pub monitor_mode: MonitorMode,
}

impl Default for ExperimentSettings {
    fn default() -> Self {
        Self {
            accelerator: Accelerator::default(),
            seed: 10,
            log_dir: "../results/".to_string(),
            exp_name: "ProtoNet".to_string(),
            model_name: "PN".to_string(),
            is_test: false,
            num_test: 2,
            pre_trained_path: None,
            resume_from_checkpoint: None,
            fast_dev_run: false,
            max_epochs: 60,
            replace_sampler: false,
            per_gpu_train_batchsize: 2,
            per_gpu_val_batchsize: 8,
            per_gpu_test_batchsize: 8,
            way: 5,
            train_shot: 5,
            val_shot: 5,
            test_shot: 5,
            num_query: 15,
            lr: 0.1,
            weight_decay: 5e-4,
            decay_scheduler: DecayScheduler::Cosine,
            decay_epochs: None,
            decay_power: None,
            optim_type: OptimType::Sgd,
            metric: Metric::Cosine,
            scale_cls: 10.0,
            backbone_name: "conv4".to_string(),
            dataset_name: "miniImageNet".to_string(),
            data_root: "../data/miniImageNet".to_string(),
            is_meta: true,
            train_num_workers: 8,
            val_num_workers: 8,
            train_num_task_per_epoch: 1000,
            val_num_task: 1200,
            test_num_task: 2000,
            drop_last: false,
            monitor: "val/acc".to_string(),
            monitor_mode: MonitorMode::Max,
        }
    }
}

impl ExperimentSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set the accelerator setup
    pub fn with_accelerator(mut self, accelerator: Accelerator) -> Self {
        self.accelerator = accelerator;
        self
    }

    /// Builder: set the seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Builder: set the logging root and experiment name
    pub fn with_logging(mut self, log_dir: impl Into<String>, exp_name: impl Into<String>) -> Self {
        self.log_dir = log_dir.into();
        self.exp_name = exp_name.into();
        self
    }

    /// Builder: set the model identity
    pub fn with_model_name(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = model_name.into();
        self
    }

    /// Builder: switch to test mode with the given round count
    pub fn with_test_mode(mut self, num_test: usize) -> Self {
        self.is_test = true;
        self.num_test = num_test;
        self
    }

    /// Builder: set the training horizon
    pub fn with_max_epochs(mut self, max_epochs: usize) -> Self {
        self.max_epochs = max_epochs;
        self
    }

    /// Builder: set the episode shape
    pub fn with_episode_shape(mut self, way: usize, shot: usize, num_query: usize) -> Self {
        self.way = way;
        self.train_shot = shot;
        self.val_shot = shot;
        self.test_shot = shot;
        self.num_query = num_query;
        self
    }

    /// Builder: set the per-device batch sizes
    pub fn with_per_gpu_batch_sizes(mut self, train: usize, val: usize, test: usize) -> Self {
        self.per_gpu_train_batchsize = train;
        self.per_gpu_val_batchsize = val;
        self.per_gpu_test_batchsize = test;
        self
    }

    /// Builder: set the base learning rate
    pub fn with_lr(mut self, lr: f64) -> Self {
        self.lr = lr;
        self
    }

    /// Builder: set the weight decay
    pub fn with_weight_decay(mut self, weight_decay: f64) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    /// Builder: set the decay schedule kind
    pub fn with_decay_scheduler(mut self, kind: DecayScheduler) -> Self {
        self.decay_scheduler = kind;
        self
    }

    /// Builder: set the decay epochs and multiplier
    pub fn with_decay_epochs(mut self, epochs: Vec<usize>, power: f64) -> Self {
        self.decay_epochs = Some(epochs);
        self.decay_power = Some(power);
        self
    }

    /// Builder: set the optimizer family
    pub fn with_optim_type(mut self, optim_type: OptimType) -> Self {
        self.optim_type = optim_type;
        self
    }

    /// Builder: set the scoring metric
    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }

    /// Builder: set the logit scale
    pub fn with_scale_cls(mut self, scale_cls: f64) -> Self {
        self.scale_cls = scale_cls;
        self
    }

    /// Builder: set the backbone name
    pub fn with_backbone_name(mut self, name: impl Into<String>) -> Self {
        self.backbone_name = name.into();
        self
    }

    /// Builder: set the dataset identity and root path
    pub fn with_dataset(mut self, name: impl Into<String>, root: impl Into<String>) -> Self {
        self.dataset_name = name.into();
        self.data_root = root.into();
        self
    }

    /// Builder: enable the single-batch debugging mode
    pub fn with_fast_dev_run(mut self, fast_dev_run: bool) -> Self {
        self.fast_dev_run = fast_dev_run;
        self
    }

    /// Validate the settings and derive the full configuration artifact.
    ///
    /// Derivations applied here:
    /// - effective batch sizes are `num_gpus * per_gpu_batchsize` per phase;
    /// - the learning rate keeps its configured value on a multi-unit
    ///   accelerator and is halved on a single unit;
    /// - strategy, batch-norm synchronization and the device list all come
    ///   from the accelerator variant;
    /// - callbacks and logger specs are parameterized by the shared seed,
    ///   monitored metric and logging identity.
    pub fn build(&self) -> Result<ExperimentConfig, ConfigError> {
        self.validate()?;

        let num_gpus = self.accelerator.num_units();
        let lr = if self.accelerator.is_distributed() {
            self.lr
        } else {
            self.lr / 2.0
        };
        debug!(num_gpus, lr, "assembling experiment configuration");

        let trainer = TrainerSection {
            fast_dev_run: self.fast_dev_run,
            strategy: self.accelerator.strategy(),
            sync_batchnorm: self.accelerator.sync_batchnorm(),
            gpus: self.accelerator.gpus().clone(),
            resume_from_checkpoint: self.resume_from_checkpoint.clone(),
            max_epochs: self.max_epochs,
            callbacks: vec![
                CallbackSpec::LearningRateMonitor {
                    logging_interval: "step".to_string(),
                },
                CallbackSpec::ModelCheckpoint {
                    verbose: true,
                    save_last: true,
                    monitor: self.monitor.clone(),
                    mode: self.monitor_mode,
                },
                CallbackSpec::SetSeed { seed: self.seed },
            ],
            logger: LoggerSpec::Tensorboard {
                save_dir: self.log_dir.clone(),
                name: self.exp_name.clone(),
            },
            replace_sampler: self.replace_sampler,
        };

        let data = DataSection {
            dataset_name: self.dataset_name.clone(),
            data_root: self.data_root.clone(),
            is_meta: self.is_meta,
            train_num_workers: self.train_num_workers,
            val_num_workers: self.val_num_workers,
            train_num_task_per_epoch: self.train_num_task_per_epoch,
            val_num_task: self.val_num_task,
            test_num_task: self.test_num_task,
            train_batchsize: num_gpus * self.per_gpu_train_batchsize,
            val_batchsize: num_gpus * self.per_gpu_val_batchsize,
            test_batchsize: num_gpus * self.per_gpu_test_batchsize,
            way: self.way,
            train_shot: self.train_shot,
            val_shot: self.val_shot,
            test_shot: self.test_shot,
            num_query: self.num_query,
            is_distributed: self.accelerator.is_distributed(),
            drop_last: self.drop_last,
        };

        let model = ModelSection {
            backbone_name: self.backbone_name.clone(),
            lr,
            way: self.way,
            train_shot: self.train_shot,
            val_shot: self.val_shot,
            test_shot: self.test_shot,
            num_query: self.num_query,
            train_batch_size_per_gpu: self.per_gpu_train_batchsize,
            val_batch_size_per_gpu: self.per_gpu_val_batchsize,
            test_batch_size_per_gpu: self.per_gpu_test_batchsize,
            weight_decay: self.weight_decay,
            decay_scheduler: self.decay_scheduler,
            optim_type: self.optim_type,
            decay_epochs: self.decay_epochs.clone(),
            decay_power: self.decay_power,
            metric: self.metric,
            scale_cls: self.scale_cls,
        };

        Ok(ExperimentConfig {
            is_test: self.is_test,
            num_test: self.num_test,
            model_name: self.model_name.clone(),
            pre_trained_path: self.pre_trained_path.clone(),
            trainer,
            data,
            model,
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.accelerator.validate()?;

        if self.way == 0
            || self.train_shot == 0
            || self.val_shot == 0
            || self.test_shot == 0
            || self.num_query == 0
        {
            return Err(ConfigError::Invalid(
                "way, shots and num_query must all be at least 1".to_string(),
            ));
        }
        if self.per_gpu_train_batchsize == 0
            || self.per_gpu_val_batchsize == 0
            || self.per_gpu_test_batchsize == 0
        {
            return Err(ConfigError::Invalid(
                "per-device batch sizes must be at least 1".to_string(),
            ));
        }
        if self.max_epochs == 0 {
            return Err(ConfigError::Invalid(
                "max_epochs must be at least 1".to_string(),
            ));
        }
        if self.num_test == 0 {
            return Err(ConfigError::Invalid(
                "num_test must be at least 1".to_string(),
            ));
        }
        if self.train_num_task_per_epoch == 0 || self.val_num_task == 0 || self.test_num_task == 0
        {
            return Err(ConfigError::Invalid(
                "per-phase task counts must be at least 1".to_string(),
            ));
        }
        if !self.lr.is_finite() || self.lr <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "learning rate must be positive, got {}",
                self.lr
            )));
        }
        if !self.weight_decay.is_finite() || self.weight_decay < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "weight decay must be non-negative, got {}",
                self.weight_decay
            )));
        }
        if !self.scale_cls.is_finite() || self.scale_cls <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "scale_cls must be positive, got {}",
                self.scale_cls
            )));
        }
        match self.decay_scheduler {
            DecayScheduler::SpecifiedEpochs => match (&self.decay_epochs, self.decay_power) {
                (Some(epochs), Some(_)) if !epochs.is_empty() => {}
                _ => {
                    return Err(ConfigError::Invalid(
                        "specified_epochs decay needs decay_epochs and decay_power".to_string(),
                    ))
                }
            },
            DecayScheduler::Cosine => {
                if self.decay_epochs.is_some() || self.decay_power.is_some() {
                    return Err(ConfigError::Invalid(
                        "cosine decay takes no decay_epochs or decay_power".to_string(),
                    ));
                }
            }
        }
        for (field, value) in [
            ("log_dir", &self.log_dir),
            ("exp_name", &self.exp_name),
            ("model_name", &self.model_name),
            ("backbone_name", &self.backbone_name),
            ("dataset_name", &self.dataset_name),
            ("data_root", &self.data_root),
            ("monitor", &self.monitor),
        ] {
            if value.is_empty() {
                return Err(ConfigError::Invalid(format!("{} must not be empty", field)));
            }
        }
        Ok(())
    }
}
