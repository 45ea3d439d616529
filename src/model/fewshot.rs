//! Shared hyperparameters and the capability interface of few-shot models
//!
//! Models plug into an external training loop through [`FewShotModule`]:
//! episodic forwards for the train and val/test phases, plus the optimizer
//! and learning-rate schedule the loop should apply. Everything derives
//! from one [`FewShotHyperparams`] record, mirroring the `model` section of
//! the experiment configuration.

use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::network::Metric;
use crate::training::{DecayScheduler, EpisodeBatch, LrSchedule};
use crate::{FewShotError, Result};

/// Optimizer families understood by the training loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimType {
    Sgd,
    Adam,
}

impl Default for OptimType {
    fn default() -> Self {
        Self::Sgd
    }
}

/// Fully resolved optimizer settings handed to the training loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "optimizer", rename_all = "lowercase")]
pub enum OptimizerSettings {
    Sgd {
        lr: f64,
        weight_decay: f64,
        momentum: f64,
        nesterov: bool,
    },
    Adam {
        lr: f64,
        weight_decay: f64,
        betas: (f64, f64),
    },
}

impl OptimizerSettings {
    pub fn lr(&self) -> f64 {
        match self {
            OptimizerSettings::Sgd { lr, .. } => *lr,
            OptimizerSettings::Adam { lr, .. } => *lr,
        }
    }
}

/// Hyperparameters shared by episodic few-shot models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FewShotHyperparams {
    /// Registry name of the feature extractor
    pub backbone_name: String,
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
    /// Base learning rate
    pub lr: f64,
    /// L2 penalty applied by the optimizer
    pub weight_decay: f64,
    /// Learning rate decay kind
    pub decay_scheduler: DecayScheduler,
    /// Optimizer family
    pub optim_type: OptimType,
    /// Decay epochs, required by the specified_epochs scheduler
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

impl Default for FewShotHyperparams {
    fn default() -> Self {
        Self {
            backbone_name: "conv4".to_string(),
            way: 5,
            train_shot: 5,
            val_shot: 5,
            test_shot: 5,
            num_query: 15,
            train_batch_size_per_gpu: 2,
            val_batch_size_per_gpu: 8,
            test_batch_size_per_gpu: 8,
            lr: 0.1,
            weight_decay: 5e-4,
            decay_scheduler: DecayScheduler::Cosine,
            optim_type: OptimType::Sgd,
            decay_epochs: None,
            decay_power: None,
            metric: Metric::Cosine,
            scale_cls: 10.0,
        }
    }
}

impl FewShotHyperparams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set the backbone name
    pub fn with_backbone_name(mut self, name: impl Into<String>) -> Self {
        self.backbone_name = name.into();
        self
    }

    /// Builder: set the number of classes per task
    pub fn with_way(mut self, way: usize) -> Self {
        self.way = way;
        self
    }

    /// Builder: set the training shot count
    pub fn with_train_shot(mut self, shot: usize) -> Self {
        self.train_shot = shot;
        self
    }

    /// Builder: set the validation shot count
    pub fn with_val_shot(mut self, shot: usize) -> Self {
        self.val_shot = shot;
        self
    }

    /// Builder: set the test shot count
    pub fn with_test_shot(mut self, shot: usize) -> Self {
        self.test_shot = shot;
        self
    }

    /// Builder: set the query count per class
    pub fn with_num_query(mut self, num_query: usize) -> Self {
        self.num_query = num_query;
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

    /// Builder: set the per-device training batch size
    pub fn with_train_batch_size_per_gpu(mut self, batch_size: usize) -> Self {
        self.train_batch_size_per_gpu = batch_size;
        self
    }

    /// Check the record for internal coherence
    pub fn validate(&self) -> Result<()> {
        if self.way == 0
            || self.train_shot == 0
            || self.val_shot == 0
            || self.test_shot == 0
            || self.num_query == 0
        {
            return Err(FewShotError::InvalidParameter(
                "way, shots and num_query must all be at least 1".to_string(),
            ));
        }
        if self.train_batch_size_per_gpu == 0
            || self.val_batch_size_per_gpu == 0
            || self.test_batch_size_per_gpu == 0
        {
            return Err(FewShotError::InvalidParameter(
                "per-device batch sizes must be at least 1".to_string(),
            ));
        }
        if !self.lr.is_finite() || self.lr <= 0.0 {
            return Err(FewShotError::InvalidParameter(format!(
                "learning rate must be positive, got {}",
                self.lr
            )));
        }
        if !self.weight_decay.is_finite() || self.weight_decay < 0.0 {
            return Err(FewShotError::InvalidParameter(format!(
                "weight decay must be non-negative, got {}",
                self.weight_decay
            )));
        }
        if self.decay_scheduler == DecayScheduler::SpecifiedEpochs {
            match (&self.decay_epochs, self.decay_power) {
                (Some(epochs), Some(_)) if !epochs.is_empty() => {}
                _ => {
                    return Err(FewShotError::InvalidParameter(
                        "specified_epochs decay needs decay_epochs and decay_power".to_string(),
                    ))
                }
            }
        }
        Ok(())
    }

    /// Optimizer settings the training loop should construct
    pub fn optimizer_settings(&self) -> OptimizerSettings {
        match self.optim_type {
            OptimType::Sgd => OptimizerSettings::Sgd {
                lr: self.lr,
                weight_decay: self.weight_decay,
                momentum: 0.9,
                nesterov: true,
            },
            OptimType::Adam => OptimizerSettings::Adam {
                lr: self.lr,
                weight_decay: self.weight_decay,
                betas: (0.9, 0.999),
            },
        }
    }

    /// Learning rate schedule over the given training horizon
    pub fn lr_schedule(&self, max_epochs: usize) -> Result<LrSchedule> {
        if max_epochs == 0 {
            return Err(FewShotError::InvalidParameter(
                "max_epochs must be at least 1".to_string(),
            ));
        }
        match self.decay_scheduler {
            DecayScheduler::Cosine => Ok(LrSchedule::cosine(self.lr, max_epochs)),
            DecayScheduler::SpecifiedEpochs => {
                let epochs = match &self.decay_epochs {
                    Some(epochs) if !epochs.is_empty() => epochs.clone(),
                    _ => {
                        return Err(FewShotError::InvalidParameter(
                            "specified_epochs decay needs decay_epochs".to_string(),
                        ))
                    }
                };
                let power = self.decay_power.ok_or_else(|| {
                    FewShotError::InvalidParameter(
                        "specified_epochs decay needs decay_power".to_string(),
                    )
                })?;
                Ok(LrSchedule::specified_epochs(self.lr, epochs, power))
            }
        }
    }
}

/// Capability interface between a few-shot model and the training loop
pub trait FewShotModule {
    /// The hyperparameter record the model was built from
    fn hyperparams(&self) -> &FewShotHyperparams;

    /// Episodic forward for a training batch, using the training shot count.
    /// Returns logits `[batch_size, way * num_query, way]`.
    fn train_forward(&self, batch: &EpisodeBatch) -> Result<Array3<f64>>;

    /// Episodic forward for a validation or test batch with an explicit
    /// episode shape
    fn val_test_forward(&self, batch: &EpisodeBatch, way: usize, shot: usize)
        -> Result<Array3<f64>>;

    /// Optimizer settings the training loop should construct
    fn optimizer_settings(&self) -> OptimizerSettings {
        self.hyperparams().optimizer_settings()
    }

    /// Learning rate schedule over the given training horizon
    fn lr_schedule(&self, max_epochs: usize) -> Result<LrSchedule> {
        self.hyperparams().lr_schedule(max_epochs)
    }
}
