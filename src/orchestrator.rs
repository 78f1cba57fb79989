//! Self-play fleet, arena evaluation, and the training-step interface
//! (SPEC_FULL.md §4.7), grounded in the teacher's thread-per-worker launch
//! idiom (`main_cli.rs`) and `original_source`'s driver loop shape.
//!
//! Per-worker panics are joined and re-raised once every worker has
//! finished (SPEC_FULL.md §7) rather than silently swallowed or left to
//! poison the shared experience pool.

use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use anyhow::anyhow;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::agent;
use crate::config::Config;
use crate::evaluator::Evaluator;
use crate::experience::Experience;
use crate::game_state::GameState;
use crate::mcts::Mcts;
use crate::network::PolicyValueNetwork;
use crate::piece::Side;

/// Joins every handle, re-raising the first observed panic only after all
/// workers have been waited on (SPEC_FULL.md §7's propagation policy).
fn join_and_propagate(handles: Vec<JoinHandle<()>>) {
    let mut first_panic = None;
    for handle in handles {
        if let Err(panic) = handle.join() {
            first_panic.get_or_insert(panic);
        }
    }
    if let Some(panic) = first_panic {
        std::panic::resume_unwind(panic);
    }
}

/// Runs `config.num_self_play_games` games across `config.num_threads`
/// worker threads sharing one Evaluator, returning the combined experience
/// pool.
pub fn run_self_play_fleet(network: Arc<dyn PolicyValueNetwork>, config: Config) -> anyhow::Result<Vec<Experience>> {
    let evaluator = Evaluator::new(network, config.clone());
    let next_game = Arc::new(AtomicUsize::new(0));
    let experiences = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::with_capacity(config.num_threads.max(1));
    for worker_id in 0..config.num_threads.max(1) {
        let evaluator = Arc::clone(&evaluator);
        let config = config.clone();
        let next_game = Arc::clone(&next_game);
        let experiences = Arc::clone(&experiences);
        handles.push(std::thread::spawn(move || loop {
            let game_index = next_game.fetch_add(1, Ordering::SeqCst);
            if game_index >= config.num_self_play_games {
                break;
            }
            let seed = game_index as u64;
            let game_experiences = agent::play_self_play_game(Arc::clone(&evaluator), config.clone(), worker_id, seed);
            info!(worker_id, game_index, moves = game_experiences.len(), "self-play game finished");
            experiences.lock().unwrap().extend(game_experiences);
        }));
    }
    join_and_propagate(handles);

    Ok(Arc::try_unwrap(experiences)
        .map_err(|_| anyhow!("experience pool still shared after every worker was joined"))?
        .into_inner()
        .unwrap_or_else(|poisoned| poisoned.into_inner()))
}

pub struct ArenaResult {
    /// Sum of per-game scores (win=2, draw=1, loss=0) from the challenger's
    /// perspective.
    pub challenger_score: f32,
    pub games_played: usize,
    /// True once `challenger_score / (2 * games_played) >= config.arena_target_score`.
    pub promoted: bool,
}

/// Plays `config.total_games_for_arena` games between `challenger` and
/// `champion`, alternating colors evenly, using deterministic MCTS
/// (`best_move(true)`, no root Dirichlet noise) on both sides.
pub fn run_arena(
    challenger: Arc<dyn PolicyValueNetwork>,
    champion: Arc<dyn PolicyValueNetwork>,
    config: Config,
) -> anyhow::Result<ArenaResult> {
    let challenger_evaluator = Evaluator::new(challenger, config.clone());
    let champion_evaluator = Evaluator::new(champion, config.clone());
    let next_game = Arc::new(AtomicUsize::new(0));
    let total_score = Arc::new(Mutex::new(0f32));

    let mut handles = Vec::with_capacity(config.num_threads.max(1));
    for worker_id in 0..config.num_threads.max(1) {
        let challenger_evaluator = Arc::clone(&challenger_evaluator);
        let champion_evaluator = Arc::clone(&champion_evaluator);
        let config = config.clone();
        let next_game = Arc::clone(&next_game);
        let total_score = Arc::clone(&total_score);
        handles.push(std::thread::spawn(move || loop {
            let game_index = next_game.fetch_add(1, Ordering::SeqCst);
            if game_index >= config.total_games_for_arena {
                break;
            }
            let challenger_is_white = game_index % 2 == 0;
            let score = play_arena_game(
                &challenger_evaluator,
                &champion_evaluator,
                &config,
                worker_id,
                game_index as u64,
                challenger_is_white,
            );
            info!(worker_id, game_index, score, "arena game finished");
            *total_score.lock().unwrap() += score;
        }));
    }
    join_and_propagate(handles);

    let challenger_score = *total_score.lock().unwrap();
    let games_played = config.total_games_for_arena;
    let promoted = games_played > 0
        && challenger_score / (2.0 * games_played as f32) >= config.arena_target_score;

    Ok(ArenaResult {
        challenger_score,
        games_played,
        promoted,
    })
}

/// Returns the challenger's score for one game: `2.0` win, `1.0` draw,
/// `0.0` loss.
fn play_arena_game(
    challenger_evaluator: &Arc<Evaluator>,
    champion_evaluator: &Arc<Evaluator>,
    config: &Config,
    worker_id: usize,
    seed: u64,
    challenger_is_white: bool,
) -> f32 {
    let mut current = GameState::initial();
    let mut ended_by_checkmate = false;

    for ply in 0..config.max_game_moves_until_draw {
        if current.legal_moves().is_empty() || current.is_draw() {
            ended_by_checkmate = current.legal_moves().is_empty() && !current.is_draw();
            break;
        }

        let side_is_challenger = (current.side_to_move() == Side::White) == challenger_is_white;
        let evaluator = if side_is_challenger {
            challenger_evaluator
        } else {
            champion_evaluator
        };

        let game_seed = seed.wrapping_add(ply as u64);
        let mut mcts = Mcts::new(Rc::clone(&current), Arc::clone(evaluator), config.clone(), worker_id, game_seed, false);
        mcts.run(config.num_mcts_iterations);

        let mut rng = StdRng::seed_from_u64(game_seed);
        let mv = mcts.best_move(true, &mut rng);
        current = GameState::apply(&current, mv);
    }

    if !ended_by_checkmate {
        return 1.0;
    }
    let loser_is_white = current.side_to_move() == Side::White;
    let challenger_lost = loser_is_white == challenger_is_white;
    if challenger_lost {
        0.0
    } else {
        2.0
    }
}

/// Training step interface (SPEC_FULL.md §4.7 and Non-goals: the optimizer
/// and loss computation are external). Shuffles the pool, splits it into
/// `config.train_batch_size` minibatches, and hands each to `step`, which
/// is expected to run one optimizer step against the network and return its
/// scalar loss.
pub fn run_training_step(
    experiences: &mut [Experience],
    config: &Config,
    rng: &mut impl Rng,
    mut step: impl FnMut(&[Experience]) -> f32,
) -> Vec<f32> {
    experiences.shuffle(rng);
    experiences.chunks(config.train_batch_size.max(1)).map(|batch| step(batch)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experience::GameSnapshot;
    use crate::features::NUM_POLICY_SLOTS;

    struct FixedValueNetwork(f32);

    impl PolicyValueNetwork for FixedValueNetwork {
        fn value(&self, batch: &[Vec<f32>]) -> Vec<f32> {
            vec![self.0; batch.len()]
        }
        fn policy(&self, batch: &[Vec<f32>]) -> Vec<Vec<f32>> {
            vec![vec![0.0; NUM_POLICY_SLOTS]; batch.len()]
        }
    }

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.num_threads = 2;
        config.num_mcts_iterations = 4;
        config.max_game_moves_until_draw = 6;
        config.do_batch_mcts = false;
        config.use_async_inference = false;
        config.num_self_play_games = 3;
        config.total_games_for_arena = 4;
        config
    }

    #[test]
    fn self_play_fleet_produces_at_most_one_games_worth_of_experience_per_game() {
        let config = fast_config();
        let experiences = run_self_play_fleet(Arc::new(FixedValueNetwork(0.0)), config.clone()).unwrap();
        assert!(experiences.len() as u32 <= config.num_self_play_games as u32 * config.max_game_moves_until_draw);
    }

    #[test]
    fn arena_scores_every_requested_game() {
        let config = fast_config();
        let result = run_arena(
            Arc::new(FixedValueNetwork(0.1)),
            Arc::new(FixedValueNetwork(-0.1)),
            config.clone(),
        )
        .unwrap();
        assert_eq!(result.games_played, config.total_games_for_arena);
        assert!(result.challenger_score >= 0.0 && result.challenger_score <= 2.0 * result.games_played as f32);
    }

    #[test]
    fn promotion_threshold_is_computed_from_total_score() {
        let mut config = fast_config();
        config.total_games_for_arena = 2;
        config.arena_target_score = 0.9;
        // A challenger that never wins (everything ends in the move-cap
        // draw, score 1.0/game) cannot clear a 90% target.
        let result = run_arena(Arc::new(FixedValueNetwork(0.0)), Arc::new(FixedValueNetwork(0.0)), config).unwrap();
        let expected_fraction = result.challenger_score / (2.0 * result.games_played as f32);
        assert_eq!(result.promoted, expected_fraction >= 0.9);
    }

    #[test]
    fn training_step_chunks_cover_the_whole_pool_exactly_once() {
        let config = {
            let mut c = Config::default();
            c.train_batch_size = 2;
            c
        };
        let mut rng = StdRng::seed_from_u64(5);
        let state = GameState::initial();
        let mut experiences: Vec<Experience> = (0..5)
            .map(|_| Experience {
                snapshot: GameSnapshot::from_state(&state),
                policy_target: vec![0.0; NUM_POLICY_SLOTS],
                result: 0.0,
            })
            .collect();

        let mut seen = 0usize;
        let losses = run_training_step(&mut experiences, &config, &mut rng, |batch| {
            seen += batch.len();
            0.0
        });
        assert_eq!(seen, 5);
        assert_eq!(losses.len(), 3); // chunks of 2, 2, 1
    }
}
