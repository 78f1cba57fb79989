//! Self-play entrypoint: runs the configured worker fleet against one
//! freshly initialized network and writes the resulting experience pool to
//! disk in the fixed binary record format (SPEC_FULL.md §6).

use std::path::PathBuf;
use std::sync::Arc;

use burn_ndarray::{NdArray, NdArrayDevice};
use clap::Parser;
use tracing::info;

use chess_az_core::config::Cli;
use chess_az_core::network::{ChessNet, PolicyValueNetwork};
use chess_az_core::{experience, orchestrator};

#[derive(Debug, Parser)]
#[command(name = "self-play", about = "Generate self-play experience records")]
struct Args {
    #[command(flatten)]
    config: Cli,

    /// Path to write the resulting experience records to.
    #[arg(long, default_value = "self_play.experience")]
    output: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    let config = args.config.resolve()?;

    let device = NdArrayDevice::default();
    let network: Arc<dyn PolicyValueNetwork> = Arc::new(ChessNet::<NdArray>::new(device));

    info!(games = config.num_self_play_games, threads = config.num_threads, "starting self-play fleet");
    let experiences = orchestrator::run_self_play_fleet(network, config)?;
    info!(count = experiences.len(), "self-play fleet finished");

    let bytes = experience::serialize(&experiences);
    std::fs::write(&args.output, bytes)?;
    info!(path = %args.output.display(), "wrote experience records");
    Ok(())
}
