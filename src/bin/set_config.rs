//! Generate the experiment configuration artifact
//!
//! Derives a consistent `config.yaml` from the experiment knobs and writes
//! it into the current working directory.
//!
//! Usage:
//! ```
//! cargo run --bin set_config -- --gpus 1,2 --max-epochs 60
//! cargo run --bin set_config -- --gpus 0 --metric euclidean
//! ```

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use protonet_fewshot::config::{Accelerator, ExperimentSettings, DEFAULT_CONFIG_FILENAME};
use protonet_fewshot::model::OptimType;
use protonet_fewshot::network::Metric;
use protonet_fewshot::training::DecayScheduler;

#[derive(Parser, Debug)]
#[command(author, version, about = "Experiment configuration generator for prototypical networks")]
struct Args {
    /// GPU ids to run on; one id selects the single-device setup
    #[arg(long, value_delimiter = ',', default_values_t = [1, 2])]
    gpus: Vec<usize>,

    /// Random seed fixed at the start of the run
    #[arg(long, default_value_t = 10)]
    seed: u64,

    /// Logging root directory
    #[arg(long, default_value = "../results/")]
    log_dir: String,

    /// Experiment name under the logging root
    #[arg(long, default_value = "ProtoNet")]
    exp_name: String,

    /// Model identity consumed by the trainer
    #[arg(long, default_value = "PN")]
    model_name: String,

    /// Run the test loop instead of training
    #[arg(long)]
    is_test: bool,

    /// Evaluation rounds in test mode
    #[arg(long, default_value_t = 2)]
    num_test: usize,

    /// Debugging mode running a single batch per phase
    #[arg(long)]
    fast_dev_run: bool,

    /// Maximum epochs to run
    #[arg(long, default_value_t = 60)]
    max_epochs: usize,

    /// Classes per task
    #[arg(long, default_value_t = 5)]
    way: usize,

    /// Support samples per class during training
    #[arg(long, default_value_t = 5)]
    train_shot: usize,

    /// Support samples per class during validation
    #[arg(long, default_value_t = 5)]
    val_shot: usize,

    /// Support samples per class during testing
    #[arg(long, default_value_t = 5)]
    test_shot: usize,

    /// Query samples per class
    #[arg(long, default_value_t = 15)]
    num_query: usize,

    /// Tasks per device in one training step
    #[arg(long, default_value_t = 2)]
    per_gpu_train_batchsize: usize,

    /// Tasks per device in one validation step
    #[arg(long, default_value_t = 8)]
    per_gpu_val_batchsize: usize,

    /// Tasks per device in one test step
    #[arg(long, default_value_t = 8)]
    per_gpu_test_batchsize: usize,

    /// Base learning rate of the multi-device setup
    #[arg(long, default_value_t = 0.1)]
    lr: f64,

    /// L2 penalty applied by the optimizer
    #[arg(long, default_value_t = 5e-4)]
    weight_decay: f64,

    /// Learning rate decay kind (cosine or specified_epochs)
    #[arg(long, default_value = "cosine")]
    decay_scheduler: String,

    /// Decay epochs for the specified_epochs scheduler
    #[arg(long, value_delimiter = ',')]
    decay_epochs: Option<Vec<usize>>,

    /// Multiplier applied at each decay epoch
    #[arg(long)]
    decay_power: Option<f64>,

    /// Optimizer family (sgd or adam)
    #[arg(long, default_value = "sgd")]
    optim: String,

    /// Scoring metric of the prototype head (cosine or euclidean)
    #[arg(long, default_value = "cosine")]
    metric: String,

    /// Logit scale of the prototype head
    #[arg(long, default_value_t = 10.0)]
    scale_cls: f64,

    /// Registry name of the feature extractor
    #[arg(long, default_value = "conv4")]
    backbone: String,

    /// Dataset identity
    #[arg(long, default_value = "miniImageNet")]
    dataset: String,

    /// Root directory of the dataset images
    #[arg(long, default_value = "../data/miniImageNet")]
    data_root: String,

    /// Checkpoint to initialize weights from
    #[arg(long)]
    pre_trained_path: Option<String>,

    /// Checkpoint file to resume training from
    #[arg(long)]
    resume_from_checkpoint: Option<String>,

    /// Write the artifact here instead of ./config.yaml
    #[arg(long)]
    output: Option<PathBuf>,
}

fn parse_scheduler(name: &str) -> Result<DecayScheduler> {
    match name {
        "cosine" => Ok(DecayScheduler::Cosine),
        "specified_epochs" => Ok(DecayScheduler::SpecifiedEpochs),
        other => bail!("unknown decay scheduler: {}", other),
    }
}

fn parse_optim(name: &str) -> Result<OptimType> {
    match name {
        "sgd" => Ok(OptimType::Sgd),
        "adam" => Ok(OptimType::Adam),
        other => bail!("unknown optimizer: {}", other),
    }
}

fn parse_metric(name: &str) -> Result<Metric> {
    match name {
        "cosine" => Ok(Metric::Cosine),
        "euclidean" => Ok(Metric::Euclidean),
        other => bail!("unknown metric: {}", other),
    }
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();

    let accelerator = if args.gpus.len() == 1 {
        Accelerator::single(args.gpus[0])
    } else {
        Accelerator::multi(args.gpus.clone())
    };

    let mut settings = ExperimentSettings::new()
        .with_accelerator(accelerator)
        .with_seed(args.seed)
        .with_logging(args.log_dir, args.exp_name)
        .with_model_name(args.model_name)
        .with_max_epochs(args.max_epochs)
        .with_per_gpu_batch_sizes(
            args.per_gpu_train_batchsize,
            args.per_gpu_val_batchsize,
            args.per_gpu_test_batchsize,
        )
        .with_lr(args.lr)
        .with_weight_decay(args.weight_decay)
        .with_decay_scheduler(parse_scheduler(&args.decay_scheduler)?)
        .with_optim_type(parse_optim(&args.optim)?)
        .with_metric(parse_metric(&args.metric)?)
        .with_scale_cls(args.scale_cls)
        .with_backbone_name(args.backbone)
        .with_dataset(args.dataset, args.data_root)
        .with_fast_dev_run(args.fast_dev_run);

    settings.way = args.way;
    settings.train_shot = args.train_shot;
    settings.val_shot = args.val_shot;
    settings.test_shot = args.test_shot;
    settings.num_query = args.num_query;
    settings.is_test = args.is_test;
    settings.num_test = args.num_test;
    settings.decay_epochs = args.decay_epochs;
    settings.decay_power = args.decay_power;
    settings.pre_trained_path = args.pre_trained_path;
    settings.resume_from_checkpoint = args.resume_from_checkpoint;

    let config = settings.build()?;
    info!(
        num_gpus = config.trainer.gpus.num_units(),
        lr = config.model.lr,
        train_batchsize = config.data.train_batchsize,
        "derived experiment configuration"
    );

    match &args.output {
        Some(path) => {
            config.write_to(path)?;
            println!("Wrote {}", path.display());
        }
        None => {
            config.write_default()?;
            println!("Wrote {}", DEFAULT_CONFIG_FILENAME);
        }
    }
    Ok(())
}
