//! Utility functions and metrics
//!
//! This module provides:
//! - Classification metrics over episodic logits
//! - Mean and confidence-interval aggregation

mod metrics;

pub use metrics::{
    accuracy_from_logits, cross_entropy_from_logits, episode_labels, mean_confidence_interval,
    per_task_accuracies,
};
