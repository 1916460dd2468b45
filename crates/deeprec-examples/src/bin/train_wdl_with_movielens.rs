//! Trains a wide-and-deep ranking model on MovieLens.
//!
//! Ratings of 4 and above are positives. Training runs until the eval loss
//! stops improving for 1000 steps or `--max-steps` is reached, evaluating
//! the test split after every checkpoint.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use deeprec_data::MovielensRanking;
use deeprec_examples::{build_estimator, run, run_config, RunOptions};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "train_wdl_with_movielens", version, about)]
struct Args {
    /// Directory holding users.dat, movies.dat and ratings.dat
    #[arg(long, env = "DEEPREC_MOVIELENS_DIR")]
    data_dir: Option<PathBuf>,

    /// Generate a synthetic dataset instead of reading files
    #[arg(long)]
    synthetic: bool,

    /// Synthetic dataset size as users,movies,ratings
    #[arg(long, default_value = "500,300,50000", value_delimiter = ',')]
    synthetic_size: Vec<usize>,

    /// Checkpoint directory; a temporary directory when omitted
    #[arg(long, env = "DEEPREC_MODEL_DIR")]
    model_dir: Option<PathBuf>,

    /// Stop after this global step even if the loss still improves
    #[arg(long)]
    max_steps: Option<u64>,

    #[arg(long, default_value_t = 256)]
    batch_size: usize,

    #[arg(long, default_value_t = 8)]
    inter_op_threads: usize,

    #[arg(long, default_value_t = 8)]
    intra_op_threads: usize,

    /// JSON file whose fields override the run config
    #[arg(long)]
    run_config: Option<PathBuf>,
}

fn load_dataset(args: &Args) -> Result<MovielensRanking> {
    if args.synthetic {
        let [users, movies, ratings] = args.synthetic_size[..] else {
            bail!("--synthetic-size takes exactly three values");
        };
        return MovielensRanking::synthetic(users, movies, ratings, 42)
            .context("Failed to generate synthetic MovieLens data");
    }
    let Some(dir) = &args.data_dir else {
        bail!("either --data-dir (or DEEPREC_MOVIELENS_DIR) or --synthetic is required");
    };
    MovielensRanking::load(dir)
        .with_context(|| format!("Failed to load MovieLens from {}", dir.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("deeprec=info".parse()?))
        .init();

    let args = Args::parse();
    let dataset = load_dataset(&args)?;

    let mut config = run_config(
        args.model_dir.clone(),
        args.inter_op_threads,
        args.intra_op_threads,
    );
    if let Some(path) = &args.run_config {
        config = config
            .with_overrides_from_file(path)
            .with_context(|| format!("Failed to apply run config {}", path.display()))?;
    }

    let estimator = build_estimator(&dataset, config).context("Failed to build estimator")?;
    let result = run(
        &dataset,
        &estimator,
        RunOptions {
            batch_size: args.batch_size,
            max_steps: args.max_steps,
        },
    )
    .context("Training failed")?;

    info!(
        global_step = result.global_step,
        loss = result.metrics.loss,
        auc = result.metrics.get("auc").unwrap_or(f64::NAN),
        model_dir = %estimator.model_dir().display(),
        "Finished wide-and-deep training"
    );
    Ok(())
}
