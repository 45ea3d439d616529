//! Episodic batch sampling for few-shot classification
//!
//! Episodes are packed into a single stacked tensor so the whole batch can
//! run through a backbone in one pass. Each task occupies a contiguous run
//! of `way * (shot + num_query)` rows: first the support block with `shot`
//! consecutive samples per class, then the query block with `num_query`
//! consecutive samples per class, in the same class order.

use ndarray::{Array1, ArrayD, Axis, IxDyn};
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{FewShotError, Result};

/// A batch of episodic tasks in the stacked layout
#[derive(Debug, Clone)]
pub struct EpisodeBatch {
    /// Samples `[batch_size * samples_per_task, ...sample_dims]`
    data: ArrayD<f64>,
    /// Dataset-level class id of every sample. The episodic forward pass
    /// never reads these; query targets follow from the layout alone.
    labels: Array1<usize>,
    /// Number of tasks stacked in `data`
    batch_size: usize,
}

impl EpisodeBatch {
    /// Validate and wrap a stacked batch.
    ///
    /// The sample count must be positive, divisible by `batch_size`, and
    /// match the label count.
    pub fn new(data: ArrayD<f64>, labels: Array1<usize>, batch_size: usize) -> Result<Self> {
        if data.ndim() < 2 {
            return Err(FewShotError::ShapeMismatch(format!(
                "batch data must be [n, ...sample_dims], got shape {:?}",
                data.shape()
            )));
        }
        let total = data.shape()[0];
        if batch_size == 0 || total == 0 || total % batch_size != 0 {
            return Err(FewShotError::ShapeMismatch(format!(
                "{} samples cannot split into {} equally sized tasks",
                total, batch_size
            )));
        }
        if labels.len() != total {
            return Err(FewShotError::ShapeMismatch(format!(
                "{} labels for {} samples",
                labels.len(),
                total
            )));
        }
        Ok(Self {
            data,
            labels,
            batch_size,
        })
    }

    pub fn data(&self) -> &ArrayD<f64> {
        &self.data
    }

    pub fn labels(&self) -> &Array1<usize> {
        &self.labels
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Samples in each task
    pub fn samples_per_task(&self) -> usize {
        self.data.shape()[0] / self.batch_size
    }

    /// Shape of one sample
    pub fn sample_dims(&self) -> &[usize] {
        &self.data.shape()[1..]
    }
}

/// Per-class sample store feeding the episode sampler
#[derive(Debug, Clone, Default)]
pub struct FewShotDataset {
    class_samples: HashMap<usize, Vec<ArrayD<f64>>>,
    sample_shape: Option<Vec<usize>>,
}

impl FewShotDataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add samples for one class. All samples in the dataset must share
    /// one shape.
    pub fn add_class_samples(&mut self, class_id: usize, samples: Vec<ArrayD<f64>>) -> Result<()> {
        for sample in &samples {
            self.check_shape(sample.shape())?;
        }
        self.class_samples
            .entry(class_id)
            .or_insert_with(Vec::new)
            .extend(samples);
        Ok(())
    }

    /// Add a stack of labeled samples `[n, ...sample_dims]`
    pub fn add_samples(&mut self, data: &ArrayD<f64>, labels: &[usize]) -> Result<()> {
        if data.ndim() < 2 || data.shape()[0] != labels.len() {
            return Err(FewShotError::ShapeMismatch(format!(
                "{} labels for data of shape {:?}",
                labels.len(),
                data.shape()
            )));
        }
        for (i, &label) in labels.iter().enumerate() {
            let sample = data.index_axis(Axis(0), i).to_owned();
            self.check_shape(sample.shape())?;
            self.class_samples
                .entry(label)
                .or_insert_with(Vec::new)
                .push(sample);
        }
        Ok(())
    }

    fn check_shape(&mut self, shape: &[usize]) -> Result<()> {
        match &self.sample_shape {
            None => {
                self.sample_shape = Some(shape.to_vec());
                Ok(())
            }
            Some(expected) if expected.as_slice() == shape => Ok(()),
            Some(expected) => Err(FewShotError::ShapeMismatch(format!(
                "sample shape {:?} does not match dataset shape {:?}",
                shape, expected
            ))),
        }
    }

    pub fn num_classes(&self) -> usize {
        self.class_samples.len()
    }

    pub fn samples_per_class(&self) -> HashMap<usize, usize> {
        self.class_samples
            .iter()
            .map(|(&id, v)| (id, v.len()))
            .collect()
    }

    /// Shape of one sample, if any were added
    pub fn sample_shape(&self) -> Option<&[usize]> {
        self.sample_shape.as_deref()
    }

    fn class_ids_sorted(&self) -> Vec<usize> {
        let mut ids: Vec<usize> = self.class_samples.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn samples_of(&self, class_id: usize) -> Option<&Vec<ArrayD<f64>>> {
        self.class_samples.get(&class_id)
    }
}

/// Episode shape parameters for the sampler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Classes per task
    pub way: usize,
    /// Support samples per class
    pub shot: usize,
    /// Query samples per class
    pub num_query: usize,
    /// Tasks stacked into one batch
    pub batch_size: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            way: 5,
            shot: 5,
            num_query: 15,
            batch_size: 1,
        }
    }
}

/// Draws episodic batches from a [`FewShotDataset`]
pub struct EpisodeSampler {
    config: SamplerConfig,
    dataset: FewShotDataset,
    rng: StdRng,
}

impl EpisodeSampler {
    /// Create a sampler seeded from entropy
    pub fn new(dataset: FewShotDataset, config: SamplerConfig) -> Self {
        Self {
            config,
            dataset,
            rng: StdRng::from_entropy(),
        }
    }

    /// Create a sampler with a fixed seed for reproducibility
    pub fn with_seed(dataset: FewShotDataset, config: SamplerConfig, seed: u64) -> Self {
        Self {
            config,
            dataset,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    pub fn dataset(&self) -> &FewShotDataset {
        &self.dataset
    }

    /// Whether the dataset can supply a full batch
    pub fn can_sample(&self) -> bool {
        let min_samples = self.config.shot + self.config.num_query;
        self.config.way >= 1
            && self.config.batch_size >= 1
            && self.dataset.num_classes() >= self.config.way
            && self
                .dataset
                .samples_per_class()
                .values()
                .all(|&n| n >= min_samples)
    }

    /// Draw one stacked batch of `batch_size` tasks
    pub fn sample_batch(&mut self) -> Result<EpisodeBatch> {
        if !self.can_sample() {
            return Err(FewShotError::InsufficientData(format!(
                "dataset with {} classes cannot supply way={} tasks of {} samples per class",
                self.dataset.num_classes(),
                self.config.way,
                self.config.shot + self.config.num_query
            )));
        }

        let sample_dims = match self.dataset.sample_shape() {
            Some(dims) => dims.to_vec(),
            None => {
                return Err(FewShotError::InsufficientData(
                    "dataset holds no samples".to_string(),
                ))
            }
        };

        let way = self.config.way;
        let shot = self.config.shot;
        let num_query = self.config.num_query;
        let samples_per_task = way * (shot + num_query);
        let total = self.config.batch_size * samples_per_task;

        let mut data_shape = vec![total];
        data_shape.extend(&sample_dims);
        let mut data = ArrayD::zeros(IxDyn(&data_shape));
        let mut labels = Array1::zeros(total);

        let class_ids = self.dataset.class_ids_sorted();

        for task in 0..self.config.batch_size {
            let task_offset = task * samples_per_task;
            let chosen: Vec<usize> = class_ids
                .choose_multiple(&mut self.rng, way)
                .copied()
                .collect();

            for (slot, &class_id) in chosen.iter().enumerate() {
                let samples = self.dataset.samples_of(class_id).ok_or_else(|| {
                    FewShotError::InsufficientData(format!("class {} disappeared", class_id))
                })?;

                // Draw shot + num_query distinct samples for this class
                let picks: Vec<usize> = (0..samples.len())
                    .collect::<Vec<_>>()
                    .choose_multiple(&mut self.rng, shot + num_query)
                    .copied()
                    .collect();

                for (i, &pick) in picks.iter().enumerate() {
                    let row = if i < shot {
                        task_offset + slot * shot + i
                    } else {
                        task_offset + way * shot + slot * num_query + (i - shot)
                    };
                    data.index_axis_mut(Axis(0), row).assign(&samples[pick]);
                    labels[row] = class_id;
                }
            }
        }

        EpisodeBatch::new(data, labels, self.config.batch_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    /// Dataset where every sample of class c is constant-valued c
    fn toy_dataset(n_classes: usize, per_class: usize, dims: &[usize]) -> FewShotDataset {
        let mut dataset = FewShotDataset::new();
        for class_id in 0..n_classes {
            let samples: Vec<ArrayD<f64>> = (0..per_class)
                .map(|_| Array::from_elem(IxDyn(dims), class_id as f64))
                .collect();
            dataset.add_class_samples(class_id, samples).unwrap();
        }
        dataset
    }

    #[test]
    fn test_dataset_shape_guard() {
        let mut dataset = FewShotDataset::new();
        dataset
            .add_class_samples(0, vec![Array::zeros(IxDyn(&[4]))])
            .unwrap();

        let err = dataset
            .add_class_samples(1, vec![Array::zeros(IxDyn(&[5]))])
            .unwrap_err();
        assert!(matches!(err, FewShotError::ShapeMismatch(_)));
    }

    #[test]
    fn test_add_samples_by_rows() {
        let mut dataset = FewShotDataset::new();
        let data = Array::from_shape_fn(IxDyn(&[6, 3]), |idx| idx[0] as f64);
        dataset.add_samples(&data, &[0, 0, 1, 1, 2, 2]).unwrap();

        assert_eq!(dataset.num_classes(), 3);
        assert_eq!(dataset.samples_per_class()[&1], 2);
        assert_eq!(dataset.sample_shape(), Some(&[3][..]));
    }

    #[test]
    fn test_batch_shapes() {
        let dataset = toy_dataset(5, 12, &[3, 4]);
        let config = SamplerConfig {
            way: 3,
            shot: 2,
            num_query: 4,
            batch_size: 2,
        };
        let mut sampler = EpisodeSampler::with_seed(dataset, config, 42);

        let batch = sampler.sample_batch().unwrap();
        assert_eq!(batch.batch_size(), 2);
        assert_eq!(batch.samples_per_task(), 18);
        assert_eq!(batch.data().shape(), &[36, 3, 4]);
        assert_eq!(batch.labels().len(), 36);
        assert_eq!(batch.sample_dims(), &[3, 4]);
    }

    #[test]
    fn test_batch_layout_is_class_major() {
        let dataset = toy_dataset(6, 10, &[2]);
        let config = SamplerConfig {
            way: 3,
            shot: 2,
            num_query: 3,
            batch_size: 2,
        };
        let mut sampler = EpisodeSampler::with_seed(dataset, config, 7);
        let batch = sampler.sample_batch().unwrap();

        let way = 3;
        let shot = 2;
        let num_query = 3;
        let per_task = way * (shot + num_query);

        for task in 0..batch.batch_size() {
            let offset = task * per_task;
            for slot in 0..way {
                // All support rows of one slot carry one class
                let first = batch.labels()[offset + slot * shot];
                for i in 0..shot {
                    let row = offset + slot * shot + i;
                    assert_eq!(batch.labels()[row], first);
                    // Toy samples are constant-valued with their class id
                    assert_eq!(batch.data()[[row, 0]], first as f64);
                }
                // Query rows of the same slot carry the same class
                for j in 0..num_query {
                    let row = offset + way * shot + slot * num_query + j;
                    assert_eq!(batch.labels()[row], first);
                    assert_eq!(batch.data()[[row, 1]], first as f64);
                }
            }
        }
    }

    #[test]
    fn test_insufficient_data() {
        let dataset = toy_dataset(5, 6, &[2]);
        let config = SamplerConfig {
            way: 5,
            shot: 5,
            num_query: 15,
            batch_size: 1,
        };
        let mut sampler = EpisodeSampler::with_seed(dataset, config, 1);

        assert!(!sampler.can_sample());
        let err = sampler.sample_batch().unwrap_err();
        assert!(matches!(err, FewShotError::InsufficientData(_)));
    }

    #[test]
    fn test_seeded_sampling_is_reproducible() {
        let config = SamplerConfig {
            way: 4,
            shot: 1,
            num_query: 2,
            batch_size: 2,
        };
        let mut a = EpisodeSampler::with_seed(toy_dataset(8, 5, &[3]), config.clone(), 99);
        let mut b = EpisodeSampler::with_seed(toy_dataset(8, 5, &[3]), config, 99);

        let batch_a = a.sample_batch().unwrap();
        let batch_b = b.sample_batch().unwrap();

        assert_eq!(batch_a.data(), batch_b.data());
        assert_eq!(batch_a.labels(), batch_b.labels());
    }

    #[test]
    fn test_batch_validation() {
        let data = Array::zeros(IxDyn(&[7, 2]));
        let labels = Array1::zeros(7);
        // 7 samples cannot split into 2 tasks
        assert!(EpisodeBatch::new(data, labels, 2).is_err());

        let data = Array::zeros(IxDyn(&[6, 2]));
        let labels = Array1::zeros(5);
        assert!(EpisodeBatch::new(data, labels, 2).is_err());

        let data = Array::zeros(IxDyn(&[6, 2]));
        let labels = Array1::zeros(6);
        assert!(EpisodeBatch::new(data, labels, 2).is_ok());
    }
}
