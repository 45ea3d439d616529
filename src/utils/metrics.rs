//! Classification metrics for episodic evaluation
//!
//! The model emits raw logits, so loss and accuracy are computed here on the
//! caller's side. Labels inside an episode are positional: the class-major
//! query layout fixes them regardless of the dataset's own class ids.

use ndarray::{Array1, Array3, ArrayView1, Axis};

use crate::network::softmax_rows;
use crate::{FewShotError, Result};

/// Episode-local labels implied by the class-major query layout.
///
/// Query samples are grouped per class slot, `num_query` in a row, so the
/// label sequence is `0` repeated `num_query` times, then `1`, and so on.
pub fn episode_labels(way: usize, num_query: usize) -> Array1<usize> {
    Array1::from_shape_fn(way * num_query, |i| i / num_query.max(1))
}

/// Fraction of queries whose highest logit matches the label, averaged over
/// every task in the batch
pub fn accuracy_from_logits(logits: &Array3<f64>, labels: &Array1<usize>) -> Result<f64> {
    let per_task = per_task_accuracies(logits, labels)?;
    Ok(per_task.iter().sum::<f64>() / per_task.len() as f64)
}

/// Per-task accuracy, one value per episode in the batch
pub fn per_task_accuracies(logits: &Array3<f64>, labels: &Array1<usize>) -> Result<Vec<f64>> {
    let (batch_size, n_query, way) = logits.dim();
    check_labels(labels, n_query, way, batch_size)?;

    let mut accuracies = Vec::with_capacity(batch_size);
    for task in logits.axis_iter(Axis(0)) {
        let correct = task
            .axis_iter(Axis(0))
            .zip(labels.iter())
            .filter(|(row, &label)| argmax(*row) == label)
            .count();
        accuracies.push(correct as f64 / n_query as f64);
    }
    Ok(accuracies)
}

/// Mean cross-entropy of the labels under a softmax over the logits
pub fn cross_entropy_from_logits(logits: &Array3<f64>, labels: &Array1<usize>) -> Result<f64> {
    let (batch_size, n_query, way) = logits.dim();
    check_labels(labels, n_query, way, batch_size)?;

    let mut total = 0.0;
    for task in logits.axis_iter(Axis(0)) {
        let probs = softmax_rows(&task.to_owned());
        for (q, &label) in labels.iter().enumerate() {
            total -= probs[[q, label]].max(1e-12).ln();
        }
    }
    Ok(total / (batch_size * n_query) as f64)
}

/// Mean of the values together with the half-width of their 95% confidence
/// interval
pub fn mean_confidence_interval(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let interval = 1.96 * variance.sqrt() / n.sqrt();
    (mean, interval)
}

fn check_labels(
    labels: &Array1<usize>,
    n_query: usize,
    way: usize,
    batch_size: usize,
) -> Result<()> {
    if batch_size == 0 || n_query == 0 || way == 0 {
        return Err(FewShotError::ShapeMismatch(
            "logits tensor has an empty axis".to_string(),
        ));
    }
    if labels.len() != n_query {
        return Err(FewShotError::ShapeMismatch(format!(
            "{} labels do not cover {} query samples",
            labels.len(),
            n_query
        )));
    }
    if let Some(&label) = labels.iter().find(|&&l| l >= way) {
        return Err(FewShotError::InvalidParameter(format!(
            "label {} out of range for {} classes",
            label, way
        )));
    }
    Ok(())
}

fn argmax(row: ArrayView1<'_, f64>) -> usize {
    let mut best = 0;
    let mut best_val = f64::NEG_INFINITY;
    for (i, &v) in row.iter().enumerate() {
        if v > best_val {
            best_val = v;
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{arr1, Array3};

    fn logits_from_rows(rows: &[[f64; 3]]) -> Array3<f64> {
        let mut logits = Array3::zeros((1, rows.len(), 3));
        for (q, row) in rows.iter().enumerate() {
            for (c, &v) in row.iter().enumerate() {
                logits[[0, q, c]] = v;
            }
        }
        logits
    }

    #[test]
    fn test_episode_labels_layout() {
        let labels = episode_labels(3, 2);
        assert_eq!(labels, arr1(&[0, 0, 1, 1, 2, 2]));
    }

    #[test]
    fn test_accuracy_counts_argmax_matches() {
        let logits = logits_from_rows(&[
            [5.0, 1.0, 1.0],
            [1.0, 5.0, 1.0],
            [1.0, 5.0, 1.0],
            [1.0, 1.0, 5.0],
        ]);
        let labels = arr1(&[0, 1, 2, 2]);
        let acc = accuracy_from_logits(&logits, &labels).unwrap();
        assert_relative_eq!(acc, 0.75);
    }

    #[test]
    fn test_per_task_accuracies_are_separate() {
        let mut logits = Array3::zeros((2, 2, 3));
        // task 0 always predicts class 0, task 1 always class 2
        logits[[0, 0, 0]] = 5.0;
        logits[[0, 1, 0]] = 5.0;
        logits[[1, 0, 2]] = 5.0;
        logits[[1, 1, 2]] = 5.0;
        let labels = arr1(&[0, 0]);

        let per_task = per_task_accuracies(&logits, &labels).unwrap();
        assert_relative_eq!(per_task[0], 1.0);
        assert_relative_eq!(per_task[1], 0.0);
    }

    #[test]
    fn test_uniform_logits_give_log_way_entropy() {
        let logits = Array3::zeros((2, 4, 3));
        let labels = arr1(&[0, 1, 2, 0]);
        let ce = cross_entropy_from_logits(&logits, &labels).unwrap();
        assert_relative_eq!(ce, 3.0f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_confident_correct_logits_give_low_entropy() {
        let logits = logits_from_rows(&[[50.0, 0.0, 0.0], [0.0, 50.0, 0.0]]);
        let labels = arr1(&[0, 1]);
        let ce = cross_entropy_from_logits(&logits, &labels).unwrap();
        assert!(ce < 1e-6, "cross-entropy {} should be near zero", ce);
    }

    #[test]
    fn test_confidence_interval_of_constant_values() {
        let (mean, interval) = mean_confidence_interval(&[0.8, 0.8, 0.8]);
        assert_relative_eq!(mean, 0.8);
        assert_relative_eq!(interval, 0.0);
    }

    #[test]
    fn test_confidence_interval_known_values() {
        let (mean, interval) = mean_confidence_interval(&[0.0, 1.0]);
        assert_relative_eq!(mean, 0.5);
        assert_relative_eq!(interval, 1.96 * 0.5 / 2.0f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_empty_values_yield_zero() {
        assert_eq!(mean_confidence_interval(&[]), (0.0, 0.0));
    }

    #[test]
    fn test_label_count_mismatch_is_rejected() {
        let logits = Array3::zeros((1, 4, 3));
        let labels = arr1(&[0, 1, 2]);
        assert!(accuracy_from_logits(&logits, &labels).is_err());
    }

    #[test]
    fn test_out_of_range_label_is_rejected() {
        let logits = Array3::zeros((1, 2, 3));
        let labels = arr1(&[0, 3]);
        assert!(cross_entropy_from_logits(&logits, &labels).is_err());
    }
}
