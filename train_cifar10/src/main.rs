use anyhow::{Context, Result};
use clap::Parser;
use cifar10::{CIFAR10_MEAN, CIFAR10_STD, ChannelStats};
use log::{Level, debug, info, log_enabled};
use neural_network::{Network, NetworkConfig, NetworkSummary};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::PathBuf;
use training::{Checkpoint, Trainer, TrainingConfig};

/// Trains a VGG network on CIFAR-10.
#[derive(Parser, Debug)]
#[command(name = "train_cifar10", about = "CIFAR-10 image classification training", long_about = None)]
struct Args {
    /// Learning rate [default: 0.1]
    #[arg(long)]
    lr: Option<f64>,
    /// Resume from the saved checkpoint
    #[arg(short, long)]
    resume: bool,
    /// Number of epochs to run [default: 200]
    #[arg(long)]
    epochs: Option<usize>,
    /// Directory holding (or receiving) the CIFAR-10 archive
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,
    /// Training configuration as JSON
    #[arg(long)]
    config: Option<PathBuf>,
    /// Network configuration as JSON [default: VGG16 with batch norm]
    #[arg(long)]
    network_config: Option<PathBuf>,
    /// Save a checkpoint whenever test accuracy improves
    #[arg(long)]
    save_checkpoints: bool,
    /// Fail instead of downloading missing data
    #[arg(long)]
    no_download: bool,
    /// Write the per-epoch history to this JSON file
    #[arg(long)]
    history: Option<PathBuf>,
    /// Seed for weight initialisation, shuffling and augmentation
    #[arg(long)]
    seed: Option<u64>,
}

fn training_config(args: &Args) -> Result<TrainingConfig> {
    let mut config = match &args.config {
        Some(path) => TrainingConfig::load(path)
            .with_context(|| format!("Failed to load training config {}", path.display()))?,
        None => TrainingConfig::default(),
    };
    if let Some(lr) = args.lr {
        config.learning_rate = lr;
    }
    if let Some(epochs) = args.epochs {
        config.epochs = epochs;
    }
    if args.save_checkpoints {
        config.checkpoint.enabled = true;
    }
    config.validate()?;
    Ok(config)
}

/// Layer table for one training batch.
fn model_summary(network: &Network, config: &TrainingConfig) -> Result<NetworkSummary> {
    Ok(network.summary(config.train_batch_size)?)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = training_config(&args)?;
    let mut rng = args
        .seed
        .map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);

    println!("==> Preparing data..");
    if !args.no_download {
        cifar10::download(&args.data_dir).context("Failed to download CIFAR-10")?;
    }
    let train = cifar10::load_training_data(&args.data_dir).context("Failed to load training data")?;
    let test = cifar10::load_test_data(&args.data_dir).context("Failed to load test data")?;
    info!("Loaded {} training and {} test images", train.len(), test.len());
    if log_enabled!(Level::Debug) {
        let stats = ChannelStats::compute(&train);
        for c in 0..cifar10::CHANNELS {
            debug!(
                "Channel {c}: mean {:.4} (normalizing with {}), std {:.4} (normalizing with {})",
                stats.mean[c], CIFAR10_MEAN[c], stats.std[c], CIFAR10_STD[c]
            );
        }
    }

    println!("==> Building model..");
    let network_config = match &args.network_config {
        Some(path) => NetworkConfig::load(path)
            .with_context(|| format!("Failed to load network config {}", path.display()))?,
        None => NetworkConfig::vgg16_bn(cifar10::HEIGHT),
    };
    let network = Network::with_rng(network_config, &mut rng)?;
    println!("{}", model_summary(&network, &config)?);

    let mut trainer = if args.resume {
        println!("==> Resuming from checkpoint..");
        let path = config.checkpoint.path();
        let checkpoint = Checkpoint::load(&path)
            .with_context(|| format!("Failed to resume from {}", path.display()))?;
        Trainer::from_checkpoint(checkpoint, config)
    } else {
        Trainer::new(network, config)
    };

    let history = trainer.run(&train, &test, &mut rng)?;
    history.print_summary();
    if let Some(path) = &args.history {
        history
            .save(path)
            .with_context(|| format!("Failed to write history to {}", path.display()))?;
        println!("\nHistory saved to {}", path.display());
    }

    Ok(())
}
