//! Multi-round episodic evaluation
//!
//! Runs a model's val/test forward over freshly sampled episodes for a
//! number of rounds and aggregates accuracy, a 95% confidence interval over
//! tasks and the mean cross-entropy.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::FewShotModule;
use crate::training::episode::EpisodeSampler;
use crate::utils::{
    cross_entropy_from_logits, episode_labels, mean_confidence_interval, per_task_accuracies,
};
use crate::{FewShotError, Result};

/// Metrics of one evaluation round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalRound {
    /// Mean accuracy over the round's tasks
    pub accuracy: f64,
    /// Half-width of the 95% confidence interval over tasks
    pub confidence_interval: f64,
    /// Mean cross-entropy over the round's batches
    pub loss: f64,
}

/// Aggregated metrics over all evaluation rounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalReport {
    /// The individual rounds in execution order
    pub rounds: Vec<EvalRound>,
    /// Mean accuracy over rounds
    pub accuracy: f64,
    /// Mean confidence interval over rounds
    pub confidence_interval: f64,
    /// Mean loss over rounds
    pub loss: f64,
}

impl EvalReport {
    fn from_rounds(rounds: Vec<EvalRound>) -> Self {
        let n = rounds.len().max(1) as f64;
        let accuracy = rounds.iter().map(|r| r.accuracy).sum::<f64>() / n;
        let confidence_interval = rounds.iter().map(|r| r.confidence_interval).sum::<f64>() / n;
        let loss = rounds.iter().map(|r| r.loss).sum::<f64>() / n;
        Self {
            rounds,
            accuracy,
            confidence_interval,
            loss,
        }
    }

    /// Get a summary string
    pub fn summary(&self) -> String {
        format!(
            "Acc: {:.2} ± {:.2}% | Loss: {:.4} | Rounds: {}",
            self.accuracy * 100.0,
            self.confidence_interval * 100.0,
            self.loss,
            self.rounds.len()
        )
    }
}

/// Evaluation loop over sampled episodes
#[derive(Debug, Clone, Copy)]
pub struct Evaluator {
    num_rounds: usize,
    tasks_per_round: usize,
}

impl Evaluator {
    /// Create an evaluator running `num_rounds` rounds of `tasks_per_round`
    /// tasks each
    pub fn new(num_rounds: usize, tasks_per_round: usize) -> Result<Self> {
        if num_rounds == 0 || tasks_per_round == 0 {
            return Err(FewShotError::InvalidParameter(
                "evaluation needs at least one round and one task per round".to_string(),
            ));
        }
        Ok(Self {
            num_rounds,
            tasks_per_round,
        })
    }

    /// Evaluate the model over episodes drawn from the sampler.
    ///
    /// The episode shape (way, shot, num_query) is taken from the sampler's
    /// configuration so batches and forwards always agree.
    pub fn evaluate(
        &self,
        model: &dyn FewShotModule,
        sampler: &mut EpisodeSampler,
    ) -> Result<EvalReport> {
        let way = sampler.config().way;
        let shot = sampler.config().shot;
        let labels = episode_labels(way, sampler.config().num_query);

        let mut rounds = Vec::with_capacity(self.num_rounds);
        for round in 0..self.num_rounds {
            let mut task_accuracies: Vec<f64> = Vec::with_capacity(self.tasks_per_round);
            let mut batch_losses = Vec::new();
            while task_accuracies.len() < self.tasks_per_round {
                let batch = sampler.sample_batch()?;
                let logits = model.val_test_forward(&batch, way, shot)?;
                task_accuracies.extend(per_task_accuracies(&logits, &labels)?);
                batch_losses.push(cross_entropy_from_logits(&logits, &labels)?);
            }
            task_accuracies.truncate(self.tasks_per_round);

            let (accuracy, confidence_interval) = mean_confidence_interval(&task_accuracies);
            let loss = batch_losses.iter().sum::<f64>() / batch_losses.len() as f64;
            debug!(
                round,
                accuracy, confidence_interval, loss, "evaluation round finished"
            );
            rounds.push(EvalRound {
                accuracy,
                confidence_interval,
                loss,
            });
        }
        Ok(EvalReport::from_rounds(rounds))
    }
}
