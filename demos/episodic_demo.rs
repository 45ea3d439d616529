//! Episodic Few-Shot Classification Example
//!
//! This example walks through the whole pipeline:
//! 1. Deriving the experiment configuration artifact
//! 2. Building a dataset of synthetic image-like features
//! 3. Constructing the model from the configuration's model section
//! 4. Running an episodic forward pass
//! 5. Evaluating over multiple rounds
//!
//! Run with: cargo run --example episodic_demo

use ndarray::{Array, IxDyn};
use protonet_fewshot::prelude::*;
use rand::prelude::*;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("=== Episodic Few-Shot Classification Example ===\n");

    // Episode shape for the demonstration
    let way = 5;
    let shot = 5;
    let num_query = 15;

    println!("1. Deriving the experiment configuration...");
    let config = ExperimentSettings::new()
        .with_accelerator(Accelerator::single(0))
        .with_backbone_name("flatten")
        .with_episode_shape(way, shot, num_query)
        .with_per_gpu_batch_sizes(2, 8, 8)
        .build()?;

    println!("   - train batch size: {}", config.data.train_batchsize);
    println!("   - learning rate:    {}", config.model.lr);
    println!(
        "   - strategy:         {}",
        config.trainer.strategy.as_deref().unwrap_or("none")
    );

    println!("\n2. Building a synthetic dataset...");
    let n_classes = 8;
    let per_class = shot + num_query + 5;
    let dataset = synthetic_dataset(n_classes, per_class, 16, 42);
    println!(
        "   - {} classes x {} samples of dim {}",
        dataset.num_classes(),
        per_class,
        16
    );

    println!("\n3. Constructing the model from the artifact...");
    let model = ProtoNet::from_model_section(&config.model)?;
    println!(
        "   - backbone: {}, metric: {}",
        config.model.backbone_name,
        model.hyperparams().metric.as_str()
    );

    println!("\n4. Sampling an episode batch and running the forward pass...");
    let sampler_config = SamplerConfig {
        way,
        shot,
        num_query,
        batch_size: 2,
    };
    let mut sampler = EpisodeSampler::with_seed(dataset, sampler_config, 7);
    let batch = sampler.sample_batch()?;
    let logits = model.train_forward(&batch)?;
    println!("   - logits shape: {:?}", logits.dim());

    let labels = episode_labels(way, num_query);
    let accuracy = accuracy_from_logits(&logits, &labels)?;
    let loss = cross_entropy_from_logits(&logits, &labels)?;
    println!("   - batch accuracy: {:.1}%", accuracy * 100.0);
    println!("   - cross-entropy:  {:.4}", loss);

    println!("\n5. Evaluating over multiple rounds...");
    let evaluator = Evaluator::new(config.num_test, 50)?;
    let report = evaluator.evaluate(&model, &mut sampler)?;
    for (i, round) in report.rounds.iter().enumerate() {
        println!(
            "   - round {}: acc {:.2}% ± {:.2}%",
            i + 1,
            round.accuracy * 100.0,
            round.confidence_interval * 100.0
        );
    }
    println!("   - {}", report.summary());

    println!("\n=== Example Complete ===");
    Ok(())
}

/// Generate per-class feature clusters with seeded noise
fn synthetic_dataset(n_classes: usize, per_class: usize, dim: usize, seed: u64) -> FewShotDataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut dataset = FewShotDataset::new();

    for class_id in 0..n_classes {
        let mut samples = Vec::with_capacity(per_class);
        for _ in 0..per_class {
            let sample = Array::from_shape_fn(IxDyn(&[dim]), |idx| {
                let base = if idx[0] % n_classes == class_id { 1.5 } else { 0.0 };
                base + rng.gen::<f64>() * 0.4 - 0.2
            });
            samples.push(sample);
        }
        dataset
            .add_class_samples(class_id, samples)
            .unwrap_or_else(|e| panic!("building the demo dataset failed: {}", e));
    }
    dataset
}
