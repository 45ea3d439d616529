//! Integration tests for the few-shot library
//!
//! These tests exercise the episodic pipeline and the configuration
//! artifact end-to-end.

use ndarray::{Array, IxDyn};
use protonet_fewshot::prelude::*;
use rand::prelude::*;
use tempfile::NamedTempFile;

/// Helper building a dataset of noisy one-hot clusters, one per class
fn clustered_dataset(n_classes: usize, per_class: usize, seed: u64) -> FewShotDataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut dataset = FewShotDataset::new();

    for class_id in 0..n_classes {
        let mut samples = Vec::with_capacity(per_class);
        for _ in 0..per_class {
            let sample = Array::from_shape_fn(IxDyn(&[n_classes]), |idx| {
                let base = if idx[0] == class_id { 2.0 } else { 0.0 };
                base + rng.gen::<f64>() * 0.2 - 0.1
            });
            samples.push(sample);
        }
        dataset.add_class_samples(class_id, samples).unwrap();
    }
    dataset
}

fn flatten_model(way: usize, shot: usize, num_query: usize, metric: Metric) -> ProtoNet {
    let hparams = FewShotHyperparams::new()
        .with_backbone_name("flatten")
        .with_way(way)
        .with_train_shot(shot)
        .with_val_shot(shot)
        .with_test_shot(shot)
        .with_num_query(num_query)
        .with_metric(metric);
    ProtoNet::new(hparams).unwrap()
}

#[test]
fn test_episodic_pipeline_cosine() {
    let sampler_config = SamplerConfig {
        way: 3,
        shot: 2,
        num_query: 4,
        batch_size: 2,
    };
    let mut sampler = EpisodeSampler::with_seed(clustered_dataset(5, 12, 42), sampler_config, 7);
    let model = flatten_model(3, 2, 4, Metric::Cosine);

    let batch = sampler.sample_batch().unwrap();
    let logits = model.train_forward(&batch).unwrap();
    assert_eq!(logits.dim(), (2, 12, 3));

    // well separated clusters classify almost perfectly
    let labels = episode_labels(3, 4);
    let accuracy = accuracy_from_logits(&logits, &labels).unwrap();
    assert!(accuracy > 0.9, "accuracy {} too low", accuracy);

    let loss = cross_entropy_from_logits(&logits, &labels).unwrap();
    assert!(loss.is_finite());
}

#[test]
fn test_episodic_pipeline_euclidean() {
    let sampler_config = SamplerConfig {
        way: 4,
        shot: 3,
        num_query: 5,
        batch_size: 1,
    };
    let mut sampler = EpisodeSampler::with_seed(clustered_dataset(6, 15, 9), sampler_config, 13);
    let model = flatten_model(4, 3, 5, Metric::Euclidean);

    let batch = sampler.sample_batch().unwrap();
    let logits = model.train_forward(&batch).unwrap();
    assert_eq!(logits.dim(), (1, 20, 4));

    let labels = episode_labels(4, 5);
    let accuracy = accuracy_from_logits(&logits, &labels).unwrap();
    assert!(accuracy > 0.9, "accuracy {} too low", accuracy);
}

#[test]
fn test_train_and_eval_forwards_agree() {
    let sampler_config = SamplerConfig {
        way: 3,
        shot: 2,
        num_query: 4,
        batch_size: 2,
    };
    let mut sampler = EpisodeSampler::with_seed(clustered_dataset(5, 12, 42), sampler_config, 21);
    let model = flatten_model(3, 2, 4, Metric::Cosine);

    let batch = sampler.sample_batch().unwrap();
    let train = model.train_forward(&batch).unwrap();
    let eval = model.val_test_forward(&batch, 3, 2).unwrap();
    assert_eq!(train, eval);
}

#[test]
fn test_support_overflow_is_rejected() {
    let sampler_config = SamplerConfig {
        way: 3,
        shot: 2,
        num_query: 4,
        batch_size: 1,
    };
    let mut sampler = EpisodeSampler::with_seed(clustered_dataset(5, 12, 42), sampler_config, 3);
    let model = flatten_model(3, 2, 4, Metric::Cosine);

    let batch = sampler.sample_batch().unwrap();

    // 3-way 6-shot claims all 18 task samples as support
    let result = model.val_test_forward(&batch, 3, 6);
    assert!(matches!(result, Err(FewShotError::ShapeMismatch(_))));
}

#[test]
fn test_evaluation_loop_end_to_end() {
    let sampler_config = SamplerConfig {
        way: 3,
        shot: 2,
        num_query: 4,
        batch_size: 2,
    };
    let mut sampler = EpisodeSampler::with_seed(clustered_dataset(5, 12, 42), sampler_config, 17);
    let model = flatten_model(3, 2, 4, Metric::Cosine);

    let evaluator = Evaluator::new(2, 6).unwrap();
    let report = evaluator.evaluate(&model, &mut sampler).unwrap();

    assert_eq!(report.rounds.len(), 2);
    assert!(report.accuracy > 0.9, "accuracy {} too low", report.accuracy);
    assert!(report.confidence_interval >= 0.0);
    assert!(report.loss.is_finite());
}

#[test]
fn test_multi_gpu_config_derivations() {
    let config = ExperimentSettings::default().build().unwrap();

    // two devices at 2/8/8 per device
    assert_eq!(config.data.train_batchsize, 4);
    assert_eq!(config.data.val_batchsize, 16);
    assert_eq!(config.data.test_batchsize, 16);
    assert_eq!(config.model.lr, 0.1);
    assert_eq!(config.trainer.strategy.as_deref(), Some("ddp"));
    assert!(config.trainer.sync_batchnorm);
    assert!(config.data.is_distributed);
}

#[test]
fn test_single_gpu_config_derivations() {
    let config = ExperimentSettings::default()
        .with_accelerator(Accelerator::single(1))
        .build()
        .unwrap();

    assert_eq!(config.data.train_batchsize, 2);
    assert_eq!(config.model.lr, 0.05);
    assert_eq!(config.trainer.strategy, None);
    assert!(!config.trainer.sync_batchnorm);
    assert!(!config.data.is_distributed);
}

#[test]
fn test_config_file_is_byte_identical_across_runs() {
    let config = ExperimentSettings::default().build().unwrap();

    let first = NamedTempFile::new().unwrap();
    let second = NamedTempFile::new().unwrap();
    config.write_to(first.path()).unwrap();
    config.write_to(second.path()).unwrap();

    let a = std::fs::read(first.path()).unwrap();
    let b = std::fs::read(second.path()).unwrap();
    assert!(!a.is_empty());
    assert_eq!(a, b);
}

#[test]
fn test_config_round_trip_through_file() {
    let config = ExperimentSettings::default()
        .with_seed(99)
        .with_metric(Metric::Euclidean)
        .build()
        .unwrap();

    let file = NamedTempFile::new().unwrap();
    config.write_to(file.path()).unwrap();

    let parsed = ExperimentConfig::from_yaml_file(file.path()).unwrap();
    assert_eq!(parsed, config);
}

#[test]
fn test_yaml_artifact_shape() {
    let multi = ExperimentSettings::default().build().unwrap();
    let yaml = multi.to_yaml_string().unwrap();

    for key in [
        "is_test:",
        "num_test:",
        "model_name:",
        "pre_trained_path:",
        "trainer:",
        "data:",
        "model:",
    ] {
        assert!(yaml.contains(key), "missing top-level key {}", key);
    }
    assert!(yaml.contains("strategy: ddp"));
    assert!(yaml.contains("- kind: learning_rate_monitor"));
    assert!(yaml.contains("kind: set_seed"));
    assert!(yaml.contains("kind: tensorboard"));
    assert!(yaml.contains("monitor: val/acc"));

    let single = ExperimentSettings::default()
        .with_accelerator(Accelerator::single(1))
        .build()
        .unwrap();
    let yaml = single.to_yaml_string().unwrap();
    assert!(yaml.contains("strategy: null"));
}

#[test]
fn test_learning_rate_schedules() {
    // cosine annealing from the base rate to zero
    let hparams = FewShotHyperparams::default();
    let schedule = hparams.lr_schedule(60).unwrap();
    assert!((schedule.lr_at(0) - 0.1).abs() < 1e-12);
    assert!((schedule.lr_at(30) - 0.05).abs() < 1e-12);
    assert!(schedule.lr_at(60).abs() < 1e-12);

    // multiplicative decay at listed epochs
    let hparams = FewShotHyperparams::new()
        .with_decay_scheduler(DecayScheduler::SpecifiedEpochs)
        .with_decay_epochs(vec![3, 6], 0.1);
    let schedule = hparams.lr_schedule(10).unwrap();
    assert!((schedule.lr_at(2) - 0.1).abs() < 1e-12);
    assert!((schedule.lr_at(3) - 0.01).abs() < 1e-12);
    assert!((schedule.lr_at(6) - 0.001).abs() < 1e-12);
}

#[test]
fn test_model_constructed_from_artifact() {
    // the generator and the model interact only through the artifact
    let config = ExperimentSettings::default()
        .with_backbone_name("flatten")
        .with_episode_shape(3, 2, 4)
        .build()
        .unwrap();

    let file = NamedTempFile::new().unwrap();
    config.write_to(file.path()).unwrap();
    let parsed = ExperimentConfig::from_yaml_file(file.path()).unwrap();

    let model = ProtoNet::from_model_section(&parsed.model).unwrap();
    assert_eq!(model.hyperparams().way, 3);
    assert_eq!(model.hyperparams().lr, 0.1);

    let sampler_config = SamplerConfig {
        way: 3,
        shot: 2,
        num_query: 4,
        batch_size: 2,
    };
    let mut sampler = EpisodeSampler::with_seed(clustered_dataset(5, 12, 42), sampler_config, 5);
    let batch = sampler.sample_batch().unwrap();
    let logits = model.val_test_forward(&batch, 3, 2).unwrap();
    assert_eq!(logits.dim(), (2, 12, 3));
}
