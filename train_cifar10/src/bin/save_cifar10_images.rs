use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use train_cifar10::export::save_image;

/// Writes the first few CIFAR-10 images as PNG files.
#[derive(Parser, Debug)]
#[command(name = "save_cifar10_images", about = "Export CIFAR-10 samples as PNG", long_about = None)]
struct Args {
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,
    /// Images to save from each split
    #[arg(long, default_value_t = 5)]
    count: usize,
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,
    #[arg(long)]
    no_download: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if !args.no_download {
        cifar10::download(&args.data_dir)?;
    }
    fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("Failed to create {}", args.out_dir.display()))?;

    println!("Processing training data...");
    let train = cifar10::load_training_data(&args.data_dir)?;
    for i in 0..args.count {
        if let Some(path) = save_image(&train, i, "train", &args.out_dir)? {
            println!("Training image {i}: {}", path.display());
        }
    }

    println!("\nProcessing test data...");
    let test = cifar10::load_test_data(&args.data_dir)?;
    for i in 0..args.count {
        if let Some(path) = save_image(&test, i, "test", &args.out_dir)? {
            println!("Test image {i}: {}", path.display());
        }
    }

    println!("\nImages have been saved as PNG files in {}.", args.out_dir.display());
    Ok(())
}
