//! Scoring metrics for prototype-based classification

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Metric used to score query features against class prototypes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Scaled cosine similarity: scale * <q / ||q||, p / ||p||>
    Cosine,
    /// Negative scaled squared distance: -scale * ||q - p||^2
    Euclidean,
}

impl Default for Metric {
    fn default() -> Self {
        Self::Cosine
    }
}

impl Metric {
    /// Score every query row against every prototype row.
    ///
    /// `queries` is `[n_query, dim]`, `prototypes` is `[way, dim]`; the
    /// result is `[n_query, way]` where higher scores mean a closer match
    /// under either metric.
    pub fn score_matrix(
        &self,
        queries: &Array2<f64>,
        prototypes: &Array2<f64>,
        scale: f64,
    ) -> Array2<f64> {
        match self {
            Metric::Cosine => Self::cosine_scores(queries, prototypes, scale),
            Metric::Euclidean => Self::euclidean_scores(queries, prototypes, scale),
        }
    }

    /// Scaled cosine similarity, both sides L2-normalized row-wise
    fn cosine_scores(queries: &Array2<f64>, prototypes: &Array2<f64>, scale: f64) -> Array2<f64> {
        let q = normalize_rows(queries);
        let p = normalize_rows(prototypes);
        q.dot(&p.t()) * scale
    }

    /// Negative scaled squared Euclidean distance
    fn euclidean_scores(
        queries: &Array2<f64>,
        prototypes: &Array2<f64>,
        scale: f64,
    ) -> Array2<f64> {
        let n_query = queries.nrows();
        let n_proto = prototypes.nrows();
        let mut scores = Array2::zeros((n_query, n_proto));

        for i in 0..n_query {
            let q = queries.row(i);
            for j in 0..n_proto {
                let diff = &q - &prototypes.row(j);
                scores[[i, j]] = -scale * diff.dot(&diff);
            }
        }

        scores
    }

    /// Human-readable name matching the serialized form
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::Euclidean => "euclidean",
        }
    }
}

/// L2-normalize each row of a matrix.
///
/// Rows with a norm below 1e-8 are left untouched to avoid division blowup.
pub fn normalize_rows(m: &Array2<f64>) -> Array2<f64> {
    let mut out = m.to_owned();
    for mut row in out.rows_mut() {
        let norm = row.dot(&row).sqrt();
        if norm > 1e-8 {
            row /= norm;
        }
    }
    out
}

/// Row-wise softmax with max-subtraction for numerical stability
pub fn softmax_rows(logits: &Array2<f64>) -> Array2<f64> {
    let mut out = logits.to_owned();
    for mut row in out.rows_mut() {
        let max_val = row.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        row.mapv_inplace(|x| (x - max_val).exp());
        let sum = row.sum();
        if sum < 1e-12 {
            // Uniform fallback when all scores underflow
            row.fill(1.0 / row.len() as f64);
        } else {
            row /= sum;
        }
    }
    out
}

/// Softmax over a single score vector
pub fn softmax(scores: &Array1<f64>) -> Array1<f64> {
    let max_val = scores.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    let exp_vals = scores.mapv(|x| (x - max_val).exp());
    let sum = exp_vals.sum();
    if sum < 1e-12 {
        Array1::from_elem(scores.len(), 1.0 / scores.len() as f64)
    } else {
        exp_vals / sum
    }
}
