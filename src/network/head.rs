//! Prototype classification head
//!
//! Scores query features against per-class prototypes computed from the
//! support set of each task. Works on batched episodic features shaped
//! `[batch, n_samples, ...feature_dims]`; trailing spatial axes are
//! averaged away before scoring.

use ndarray::{s, Array2, Array3, ArrayD, Axis, Ix3};
use serde::{Deserialize, Serialize};

use super::metric::{normalize_rows, Metric};
use crate::{FewShotError, Result};

/// Configuration for the prototype head
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HeadConfig {
    /// Scoring metric
    pub metric: Metric,
    /// Multiplier applied to every logit
    pub scale_cls: f64,
}

impl Default for HeadConfig {
    fn default() -> Self {
        Self {
            metric: Metric::Cosine,
            scale_cls: 10.0,
        }
    }
}

/// Nearest-prototype classifier over episodic feature batches
#[derive(Debug, Clone)]
pub struct PrototypeHead {
    metric: Metric,
    scale_cls: f64,
}

impl PrototypeHead {
    /// Create a head with the given metric and logit scale
    pub fn new(metric: Metric, scale_cls: f64) -> Result<Self> {
        if !scale_cls.is_finite() || scale_cls <= 0.0 {
            return Err(FewShotError::InvalidParameter(format!(
                "scale_cls must be positive and finite, got {}",
                scale_cls
            )));
        }
        Ok(Self { metric, scale_cls })
    }

    /// Create a head from a config record
    pub fn from_config(config: HeadConfig) -> Result<Self> {
        Self::new(config.metric, config.scale_cls)
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn scale_cls(&self) -> f64 {
        self.scale_cls
    }

    /// Score queries against class prototypes for every task in the batch.
    ///
    /// `query` is `[batch, n_query, ...feature_dims]` and `support` is
    /// `[batch, way * shot, ...feature_dims]` with support samples grouped
    /// by class (`shot` consecutive samples per class). Returns logits
    /// `[batch, n_query, way]`.
    pub fn forward(
        &self,
        query: &ArrayD<f64>,
        support: &ArrayD<f64>,
        way: usize,
        shot: usize,
    ) -> Result<Array3<f64>> {
        if way == 0 || shot == 0 {
            return Err(FewShotError::InvalidParameter(format!(
                "way and shot must be at least 1, got way={} shot={}",
                way, shot
            )));
        }

        let support = pool_features(support)?;
        let query = pool_features(query)?;

        let (s_batch, n_support, s_dim) = support.dim();
        let (q_batch, n_query, q_dim) = query.dim();

        if s_batch != q_batch || s_dim != q_dim {
            return Err(FewShotError::ShapeMismatch(format!(
                "support {:?} and query {:?} batches disagree",
                support.shape(),
                query.shape()
            )));
        }
        if n_support != way * shot {
            return Err(FewShotError::ShapeMismatch(format!(
                "support set has {} samples, expected way * shot = {}",
                n_support,
                way * shot
            )));
        }

        let mut logits = Array3::zeros((q_batch, n_query, way));
        for b in 0..q_batch {
            let sup = support.index_axis(Axis(0), b).to_owned();
            let qry = query.index_axis(Axis(0), b).to_owned();

            // Under cosine scoring the support samples are normalized
            // before averaging, so prototypes are means of directions.
            let prototypes = match self.metric {
                Metric::Cosine => class_means(&normalize_rows(&sup), way, shot),
                Metric::Euclidean => class_means(&sup, way, shot),
            };

            let scores = self.metric.score_matrix(&qry, &prototypes, self.scale_cls);
            logits.index_axis_mut(Axis(0), b).assign(&scores);
        }

        Ok(logits)
    }
}

/// Average trailing spatial axes down to `[batch, n, channels]`
fn pool_features(x: &ArrayD<f64>) -> Result<Array3<f64>> {
    if x.ndim() < 3 {
        return Err(FewShotError::ShapeMismatch(format!(
            "expected features [batch, n, ...dims], got shape {:?}",
            x.shape()
        )));
    }

    let mut pooled = x.to_owned();
    while pooled.ndim() > 3 {
        let last = Axis(pooled.ndim() - 1);
        pooled = pooled.mean_axis(last).ok_or_else(|| {
            FewShotError::ShapeMismatch("cannot pool a zero-length feature axis".to_string())
        })?;
    }

    pooled
        .into_dimensionality::<Ix3>()
        .map_err(|e| FewShotError::ShapeMismatch(e.to_string()))
}

/// Mean of each class block of `shot` consecutive support rows
fn class_means(support: &Array2<f64>, way: usize, shot: usize) -> Array2<f64> {
    let dim = support.ncols();
    let mut means = Array2::zeros((way, dim));

    for class_idx in 0..way {
        let start = class_idx * shot;
        let block = support.slice(s![start..start + shot, ..]);
        // Block length is always shot >= 1, so the mean exists
        let mean = block.mean_axis(Axis(0)).unwrap_or_else(|| {
            ndarray::Array1::zeros(dim)
        });
        means.row_mut(class_idx).assign(&mean);
    }

    means
}
