//! Prototypical network model wrapper
//!
//! [`ProtoNet`] adapts a backbone and a prototype head to the episodic batch
//! layout: encode all samples, split support from query positionally, then
//! score queries against class prototypes. The wrapper owns no training
//! state; optimizers and schedules are derived from its hyperparameters by
//! the external loop.

use ndarray::{Array3, ArrayD, Axis, IxDyn, Slice};
use tracing::debug;

use crate::config::ModelSection;
use crate::model::fewshot::{FewShotHyperparams, FewShotModule};
use crate::network::{build_backbone, Backbone, PrototypeHead};
use crate::training::EpisodeBatch;
use crate::{FewShotError, Result};

/// Few-shot classifier built from a backbone and a prototype head
#[derive(Debug)]
pub struct ProtoNet {
    hparams: FewShotHyperparams,
    backbone: Box<dyn Backbone>,
    classifier: PrototypeHead,
}

impl ProtoNet {
    /// Build the model from a hyperparameter record, resolving the backbone
    /// through the registry
    pub fn new(hparams: FewShotHyperparams) -> Result<Self> {
        hparams.validate()?;
        let backbone = build_backbone(&hparams.backbone_name)?;
        let classifier = PrototypeHead::new(hparams.metric, hparams.scale_cls)?;
        Ok(Self {
            hparams,
            backbone,
            classifier,
        })
    }

    /// Build the model around an already constructed backbone
    pub fn with_backbone(hparams: FewShotHyperparams, backbone: Box<dyn Backbone>) -> Result<Self> {
        hparams.validate()?;
        let classifier = PrototypeHead::new(hparams.metric, hparams.scale_cls)?;
        Ok(Self {
            hparams,
            backbone,
            classifier,
        })
    }

    /// Build the model from the `model` section of a configuration artifact
    pub fn from_model_section(section: &ModelSection) -> Result<Self> {
        debug!(backbone = %section.backbone_name, "building model from configuration");
        let hparams = FewShotHyperparams {
            backbone_name: section.backbone_name.clone(),
            way: section.way,
            train_shot: section.train_shot,
            val_shot: section.val_shot,
            test_shot: section.test_shot,
            num_query: section.num_query,
            train_batch_size_per_gpu: section.train_batch_size_per_gpu,
            val_batch_size_per_gpu: section.val_batch_size_per_gpu,
            test_batch_size_per_gpu: section.test_batch_size_per_gpu,
            lr: section.lr,
            weight_decay: section.weight_decay,
            decay_scheduler: section.decay_scheduler,
            optim_type: section.optim_type,
            decay_epochs: section.decay_epochs.clone(),
            decay_power: section.decay_power,
            metric: section.metric,
            scale_cls: section.scale_cls,
        };
        Self::new(hparams)
    }

    /// The backbone the model encodes samples with
    pub fn backbone(&self) -> &dyn Backbone {
        self.backbone.as_ref()
    }

    /// Episodic forward pass.
    ///
    /// Encodes every sample in the batch, splits each task into its first
    /// `way * shot` support samples and the remaining query samples, and
    /// scores the queries against class prototypes. Returns raw logits of
    /// shape `[batch_size, n_query, way]`; softmax and loss are the
    /// caller's concern.
    pub fn forward(&self, batch: &EpisodeBatch, way: usize, shot: usize) -> Result<Array3<f64>> {
        if way == 0 || shot == 0 {
            return Err(FewShotError::InvalidParameter(
                "way and shot must be at least 1".to_string(),
            ));
        }
        let num_support = way * shot;
        let samples_per_task = batch.samples_per_task();
        if num_support >= samples_per_task {
            return Err(FewShotError::ShapeMismatch(format!(
                "way * shot = {} support samples leave no query samples in a task of {}",
                num_support, samples_per_task
            )));
        }

        debug!(
            batch_size = batch.batch_size(),
            way, shot, "episodic forward"
        );

        let features = self.backbone.encode(batch.data())?;
        if features.shape()[0] != batch.data().shape()[0] {
            return Err(FewShotError::ShapeMismatch(format!(
                "backbone changed the sample count from {} to {}",
                batch.data().shape()[0],
                features.shape()[0]
            )));
        }

        let (support, query) = split_support_query(&features, batch.batch_size(), num_support)?;
        self.classifier.forward(&query, &support, way, shot)
    }
}

impl FewShotModule for ProtoNet {
    fn hyperparams(&self) -> &FewShotHyperparams {
        &self.hparams
    }

    fn train_forward(&self, batch: &EpisodeBatch) -> Result<Array3<f64>> {
        self.forward(batch, self.hparams.way, self.hparams.train_shot)
    }

    fn val_test_forward(
        &self,
        batch: &EpisodeBatch,
        way: usize,
        shot: usize,
    ) -> Result<Array3<f64>> {
        self.forward(batch, way, shot)
    }
}

/// Partition encoded features into support and query halves.
///
/// `features` is `[batch_size * samples_per_task, *feature_shape]` with each
/// task's samples contiguous. The first `num_support` samples of every task
/// become support, the rest query. Returns
/// `([batch, num_support, *feat], [batch, n_query, *feat])`.
pub fn split_support_query(
    features: &ArrayD<f64>,
    batch_size: usize,
    num_support: usize,
) -> Result<(ArrayD<f64>, ArrayD<f64>)> {
    if batch_size == 0 {
        return Err(FewShotError::InvalidParameter(
            "batch_size must be at least 1".to_string(),
        ));
    }
    let total = features.shape().first().copied().unwrap_or(0);
    if total == 0 || total % batch_size != 0 {
        return Err(FewShotError::ShapeMismatch(format!(
            "{} encoded samples cannot be split into {} tasks",
            total, batch_size
        )));
    }
    let samples_per_task = total / batch_size;
    if num_support == 0 || num_support >= samples_per_task {
        return Err(FewShotError::ShapeMismatch(format!(
            "{} support samples is invalid for tasks of {} samples",
            num_support, samples_per_task
        )));
    }

    let mut dims = vec![batch_size, samples_per_task];
    dims.extend_from_slice(&features.shape()[1..]);
    let grouped = features
        .as_standard_layout()
        .into_owned()
        .into_shape(IxDyn(&dims))
        .map_err(|e| FewShotError::ShapeMismatch(e.to_string()))?;

    let support = grouped
        .slice_axis(Axis(1), Slice::from(..num_support))
        .to_owned();
    let query = grouped
        .slice_axis(Axis(1), Slice::from(num_support..))
        .to_owned();
    Ok((support, query))
}
