//! Training entrypoint (interface only — spec.md's Non-goals exclude the
//! Adam optimizer and loss computation). Reads an experience file and drives
//! [`orchestrator::run_training_step`] over `config.num_epochs` passes,
//! logging batch composition instead of actually updating any parameters.

use std::path::PathBuf;

use clap::Parser;
use rand::rng;
use tracing::info;

use chess_az_core::config::Cli;
use chess_az_core::{experience, orchestrator};

#[derive(Debug, Parser)]
#[command(name = "train", about = "Drive the training-step interface over a saved experience pool")]
struct Args {
    #[command(flatten)]
    config: Cli,

    /// Experience file produced by the self-play binary.
    #[arg(long)]
    input: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    let config = args.config.resolve()?;

    let bytes = std::fs::read(&args.input)?;
    let mut pool = experience::deserialize(&bytes)?;
    info!(count = pool.len(), path = %args.input.display(), "loaded experience pool");

    let mut rng = rng();
    for epoch in 0..config.num_epochs {
        let losses = orchestrator::run_training_step(&mut pool, &config, &mut rng, |batch| {
            info!(epoch, batch_size = batch.len(), "training step (no-op: optimizer is external)");
            0.0
        });
        info!(epoch, batches = losses.len(), "epoch finished");
    }
    Ok(())
}
