//! Solar Prediction Dataset Inspector
//!
//! Runs the data loader for one split and prints what it would feed a model.
//!
//! # Usage
//!
//! ```bash
//! # First training batch with default settings
//! solpred-inspect --train-ds "/data/fold1/train_{0000..0036}.tar"
//!
//! # Three validation batches using a configuration file
//! solpred-inspect --config loader.toml --split val --batches 3
//! ```

use clap::Parser;
use ndarray::{concatenate, Axis};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use solpred_core::{Batch, Loader, LoaderConfig, Split};

/// Solar Prediction Dataset Inspector
#[derive(Parser, Debug)]
#[command(name = "solpred-inspect")]
#[command(about = "Print the batches the solpred data loader produces")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Split to inspect (train, val, test)
    #[arg(short, long, default_value = "train")]
    split: String,

    /// Training shard pattern
    #[arg(long)]
    train_ds: Option<String>,

    /// Validation shard pattern
    #[arg(long)]
    val_ds: Option<String>,

    /// Test shard pattern
    #[arg(long)]
    test_ds: Option<String>,

    /// Samples per batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Width and height images are resized to
    #[arg(long)]
    img_width: Option<u32>,

    /// Number of decode workers
    #[arg(long)]
    num_workers: Option<usize>,

    /// Keep the trailing undersized batch
    #[arg(long)]
    partial_batch: bool,

    /// Number of batches to print
    #[arg(short, long, default_value = "1")]
    batches: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let filter = tracing_subscriber::filter::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::filter::EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let split: Split = args.split.parse()?;

    let mut config = match &args.config {
        Some(path) => LoaderConfig::from_file(path)?,
        None => LoaderConfig::default(),
    }
    .with_env_overrides();

    // Command-line flags take precedence over file and environment
    if let Some(pattern) = args.train_ds {
        config.splits.train = pattern;
    }
    if let Some(pattern) = args.val_ds {
        config.splits.val = pattern;
    }
    if let Some(pattern) = args.test_ds {
        config.splits.test = pattern;
    }
    if let Some(batch_size) = args.batch_size {
        config.batching.batch_size = batch_size;
    }
    if let Some(width) = args.img_width {
        config.decode.image_width = width;
    }
    if let Some(workers) = args.num_workers {
        config.workers.num_workers = workers;
    }
    if args.partial_batch {
        config.batching.partial_batch = true;
    }

    let loader = Loader::from_config(config)?;
    let dataset = loader.split(split);

    tracing::info!("Inspecting {} split", split);
    tracing::info!("  Pattern: {}", dataset.pattern());
    tracing::info!("  Shards: {}", dataset.shards().len());
    tracing::info!("  Batch size: {}", dataset.batch_size());

    let mut stream = dataset.iter();
    let mut printed = 0;
    for batch in stream.by_ref().take(args.batches) {
        print_batch(printed, &batch?)?;
        printed += 1;
    }

    if printed == 0 {
        tracing::warn!("The {} split produced no batches", split);
    }
    if stream.skipped() > 0 {
        tracing::warn!("{} samples were skipped while decoding", stream.skipped());
    }

    Ok(())
}

fn print_batch(index: usize, batch: &Batch) -> Result<(), Box<dyn std::error::Error>> {
    println!("batch {index}");
    println!("json_data");
    for record in &batch.metadata {
        println!("  {}", record.as_value());
    }
    println!(
        "img size {:?} ({} time steps)",
        batch.images.shape(),
        batch.time_steps()
    );
    println!("in_data {:?}", batch.input_irradiance.shape());
    println!("{}", batch.input_irradiance);
    println!("target {:?}", batch.targets.shape());
    println!("{}", batch.targets);
    println!("diffuse_direct {:?}", batch.diffuse_direct.shape());
    println!("{}", batch.diffuse_direct);
    println!("most_recent_clear_sky");
    println!("{}", batch.most_recent_clear_sky);
    println!("target_clear_sky");
    println!("{}", batch.target_clear_sky);

    let clear_sky = concatenate(
        Axis(1),
        &[batch.most_recent_clear_sky.view(), batch.target_clear_sky.view()],
    )?;
    println!("{clear_sky}");
    Ok(())
}
