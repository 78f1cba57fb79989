//! Recognized configuration options (SPEC_FULL.md §6.2) plus a CLI overlay.
//!
//! Loading is ambient stack carried regardless of spec.md's non-goal around
//! "configuration loading" as an external module: the defaults below mirror
//! `original_source/src/config.h`'s flat field-per-option struct, and
//! `Config::from_file` follows the teacher's `clap_derive`-driven CLI in
//! spirit (`commands.rs`/`main_cli.rs`) by layering CLI overrides on top of a
//! TOML file.

use std::path::Path;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// CPU/GPU selector for the evaluator's device placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum Device {
    Cpu,
    Gpu,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Self-play worker thread count.
    pub num_threads: usize,
    /// MCTS iterations run per move decision.
    pub num_mcts_iterations: u32,
    /// Leaves accumulated before a batched evaluator call in batch mode.
    pub mcts_batch_leaf_size: usize,
    /// Negative penalty added to an ancestor's virtual_loss per queued leaf.
    pub mcts_virtual_loss: f32,
    /// Whether to run leaf-parallel batch MCTS instead of single-iteration MCTS.
    pub do_batch_mcts: bool,
    /// Batch size used when precomputing child evaluations at expansion.
    pub mcts_inference_batch_size: usize,
    /// Parent visit threshold that triggers precomputation of child values.
    pub precompute_batch_parent_min_visits: u32,
    /// Whether leaves flow through the evaluator's async queue.
    pub use_async_inference: bool,
    /// Number of dedicated inference worker threads inside the Evaluator.
    pub evaluator_worker_count: usize,
    /// Half-move cap before a self-play game is forced to a draw.
    pub max_game_moves_until_draw: u32,
    /// Alpha parameter of the root Dirichlet noise distribution.
    pub dirichlet_alpha: f32,
    /// Number of self-play games to generate per fleet run.
    pub num_self_play_games: usize,
    /// Training epochs (external module; interface only).
    pub num_epochs: usize,
    /// Minibatch size used by the training step.
    pub train_batch_size: usize,
    /// Total games to play in one arena evaluation.
    pub total_games_for_arena: usize,
    /// Minimum score (fraction of win=2/draw=1/loss=0) to promote a challenger.
    pub arena_target_score: f32,
    /// Adam learning rate (external module; interface only).
    pub learning_rate: f32,
    /// Adam weight decay (external module; interface only).
    pub weight_decay: f32,
    /// Device used for evaluator inference.
    pub device: Device,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_threads: 8,
            num_mcts_iterations: 800,
            mcts_batch_leaf_size: 8,
            mcts_virtual_loss: -1.0,
            do_batch_mcts: true,
            mcts_inference_batch_size: 20,
            precompute_batch_parent_min_visits: 2,
            use_async_inference: true,
            evaluator_worker_count: 1,
            max_game_moves_until_draw: 300,
            dirichlet_alpha: 0.3,
            num_self_play_games: 8,
            num_epochs: 1,
            train_batch_size: 40,
            total_games_for_arena: 100,
            arena_target_score: 0.55,
            learning_rate: 0.01,
            weight_decay: 1e-4,
            device: Device::Cpu,
        }
    }
}

impl Config {
    /// Loads a TOML config file, falling back to defaults for any field it
    /// does not set. A missing file is not an error condition at this layer;
    /// callers that require one should check existence first.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| Error::Config(e.to_string()))
    }
}

/// CLI overlay mirroring the recognized options. Mirrors the teacher's
/// `clap_derive`-based `Args`/`AuxCommand` style in `main_cli.rs`.
#[derive(Debug, Parser)]
#[command(name = "chess-az-core")]
pub struct Cli {
    #[arg(long)]
    pub config: Option<std::path::PathBuf>,

    #[arg(long)]
    pub num_threads: Option<usize>,

    #[arg(long)]
    pub num_mcts_iterations: Option<u32>,

    #[arg(long)]
    pub num_self_play_games: Option<usize>,

    #[arg(long)]
    pub total_games_for_arena: Option<usize>,

    #[arg(long)]
    pub device: Option<Device>,
}

impl Cli {
    /// Resolves a `Config` from an optional file plus any CLI overrides.
    pub fn resolve(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };

        if let Some(v) = self.num_threads {
            config.num_threads = v;
        }
        if let Some(v) = self.num_mcts_iterations {
            config.num_mcts_iterations = v;
        }
        if let Some(v) = self.num_self_play_games {
            config.num_self_play_games = v;
        }
        if let Some(v) = self.total_games_for_arena {
            config.total_games_for_arena = v;
        }
        if let Some(v) = self.device {
            config.device = v;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = Config::default();
        assert_eq!(config.num_threads, 8);
        assert_eq!(config.max_game_moves_until_draw, 300);
        assert!((config.dirichlet_alpha - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn cli_overrides_apply_on_top_of_defaults() {
        let cli = Cli {
            config: None,
            num_threads: Some(4),
            num_mcts_iterations: None,
            num_self_play_games: None,
            total_games_for_arena: None,
            device: Some(Device::Gpu),
        };
        let config = cli.resolve().unwrap();
        assert_eq!(config.num_threads, 4);
        assert_eq!(config.num_mcts_iterations, 800);
        assert_eq!(config.device, Device::Gpu);
    }
}
