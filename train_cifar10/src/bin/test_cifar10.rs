use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use neural_network::Mode;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::PathBuf;
use std::time::Instant;
use tensor::argmax_rows;
use train_cifar10::ConfusionMatrix;
use training::Checkpoint;

/// Evaluates a saved checkpoint on the CIFAR-10 test set.
#[derive(Parser, Debug)]
#[command(name = "test_cifar10", about = "Evaluate a CIFAR-10 checkpoint", long_about = None)]
struct Args {
    #[arg(long, default_value = "./checkpoint/ckpt.json")]
    checkpoint: PathBuf,
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,
    #[arg(long, default_value_t = 100)]
    batch_size: usize,
    /// Fail instead of downloading missing data
    #[arg(long)]
    no_download: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let start_time = Instant::now();

    println!("Loading checkpoint...");
    let checkpoint = Checkpoint::load(&args.checkpoint)
        .with_context(|| format!("Failed to load {}", args.checkpoint.display()))?;
    println!(
        "Checkpoint from epoch {} (test accuracy {:.2}%) loaded in {:.2?}",
        checkpoint.epoch,
        checkpoint.acc,
        start_time.elapsed()
    );
    let mut network = checkpoint.network;
    network.set_mode(Mode::Eval);

    let data_start = Instant::now();
    if !args.no_download {
        cifar10::download(&args.data_dir)?;
    }
    let test = cifar10::load_test_data(&args.data_dir)?;
    println!(
        "Successfully loaded {} test examples in {:.2?}",
        test.len(),
        data_start.elapsed()
    );

    let loader = cifar10::DataLoader::new(&test, args.batch_size, false, cifar10::Compose::cifar10_test())?;
    let progress_bar = ProgressBar::new(loader.num_batches() as u64);
    progress_bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}",
        )?
        .progress_chars("##-"),
    );
    progress_bar.set_message("Testing model...");

    let test_start = Instant::now();
    let mut matrix = ConfusionMatrix::new();
    for batch in loader.batches(&mut StdRng::seed_from_u64(0)) {
        let logits = network.forward(batch.images)?;
        matrix.record_batch(&batch.targets, &argmax_rows(logits.view()));
        progress_bar.inc(1);
    }
    progress_bar.finish_with_message("Testing completed!");

    println!("\nTiming Metrics:");
    println!("Testing time: {:.2?}", test_start.elapsed());
    println!("Total time: {:.2?}", start_time.elapsed());

    println!("\nTest Results:");
    println!("Total test examples: {}", matrix.total());
    println!("Correct predictions: {}", matrix.correct());
    println!("Overall accuracy: {:.2}%", matrix.accuracy());
    println!("\nPer-class Performance:");
    print!("{}", matrix.report());

    println!("\nMetric Explanations:");
    println!("- Precision: When the model predicts a class, how often is it correct?");
    println!("- Recall: Out of all actual instances of a class, how many were found?");
    println!("- F1 Score: Harmonic mean of precision and recall");

    Ok(())
}
