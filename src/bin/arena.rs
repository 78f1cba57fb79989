//! Arena entrypoint: plays a challenger against a champion network over
//! `config.total_games_for_arena` deterministic games and reports whether
//! the challenger clears `config.arena_target_score`.
//!
//! Checkpoint loading/saving for trained parameters is outside this core's
//! scope (spec.md's Non-goals exclude the optimizer/training loop), so both
//! sides here are freshly initialized networks — this binary exercises the
//! arena plumbing end to end, not a real promotion decision.

use std::sync::Arc;

use burn_ndarray::{NdArray, NdArrayDevice};
use clap::Parser;
use tracing::info;

use chess_az_core::config::Cli;
use chess_az_core::network::{ChessNet, PolicyValueNetwork};
use chess_az_core::orchestrator;

#[derive(Debug, Parser)]
#[command(name = "arena", about = "Play a challenger network against a champion")]
struct Args {
    #[command(flatten)]
    config: Cli,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    let config = args.config.resolve()?;

    let challenger: Arc<dyn PolicyValueNetwork> = Arc::new(ChessNet::<NdArray>::new(NdArrayDevice::default()));
    let champion: Arc<dyn PolicyValueNetwork> = Arc::new(ChessNet::<NdArray>::new(NdArrayDevice::default()));

    info!(games = config.total_games_for_arena, "starting arena evaluation");
    let result = orchestrator::run_arena(challenger, champion, config)?;
    info!(
        score = result.challenger_score,
        games = result.games_played,
        promoted = result.promoted,
        "arena evaluation finished"
    );

    if result.promoted {
        println!("challenger promoted: {}/{} games", result.challenger_score, 2 * result.games_played);
    } else {
        println!("challenger rejected: {}/{} games", result.challenger_score, 2 * result.games_played);
    }
    Ok(())
}
