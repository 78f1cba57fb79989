//! Batched neural-network inference service (SPEC_FULL.md §6.1, grounded in
//! `original_source/src/evaluator.h`/`evaluator.cc`).
//!
//! Three evaluation modes, matching the C++ `Evaluator` exactly:
//! - [`Evaluator::evaluate`]/[`Evaluator::evaluate_batch`]: call the network
//!   directly on the calling thread (`Evalulate`/`EvalulateBatch`).
//! - [`Evaluator::evaluate_async`]/[`Evaluator::evaluate_async_batch`]: push
//!   onto a shared queue drained by dedicated inference-worker threads, and
//!   block on a per-caller condvar slot for the result (`EvaluateAsync`/
//!   `EvaluateAsyncBatch`, `InferenceWorker`).
//!
//! A draw or a position with no legal moves never reaches the network in any
//! mode (`Evalulate`'s own short-circuit).
//!
//! One adaptation from the C++ shape: inference workers hold a [`Weak`]
//! reference to the `Evaluator` rather than an owning one, so the service
//! can be dropped normally once every self-play worker's `Arc<Evaluator>` is
//! gone, instead of requiring an explicit destructor call site.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::JoinHandle;

use crate::config::Config;
use crate::features;
use crate::game_state::GameState;
use crate::network::PolicyValueNetwork;

fn terminal_value(state: &GameState) -> Option<f32> {
    if state.is_draw() {
        Some(0.0)
    } else if state.legal_moves().is_empty() {
        Some(-1.0)
    } else {
        None
    }
}

#[derive(Default)]
struct WorkerSlot {
    result: Mutex<Option<Vec<f32>>>,
    cv: Condvar,
}

struct QueueItem {
    features: Vec<Vec<f32>>,
    worker_id: usize,
}

pub struct Evaluator {
    network: Arc<dyn PolicyValueNetwork>,
    worker_count: usize,
    queue: Mutex<VecDeque<QueueItem>>,
    queue_cv: Condvar,
    should_finish: AtomicBool,
    slots: Vec<WorkerSlot>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Evaluator {
    /// `config.num_threads` gives the number of caller slots (one per
    /// self-play/arena worker thread); `config.evaluator_worker_count` gives
    /// the number of dedicated inference threads draining the shared queue.
    pub fn new(network: Arc<dyn PolicyValueNetwork>, config: Config) -> Arc<Evaluator> {
        let num_slots = config.num_threads.max(1);
        let evaluator = Arc::new(Evaluator {
            network,
            worker_count: config.evaluator_worker_count.max(1),
            queue: Mutex::new(VecDeque::new()),
            queue_cv: Condvar::new(),
            should_finish: AtomicBool::new(false),
            slots: (0..num_slots).map(|_| WorkerSlot::default()).collect(),
            workers: Mutex::new(Vec::new()),
        });

        let mut handles = Vec::with_capacity(evaluator.worker_count);
        for _ in 0..evaluator.worker_count {
            let weak = Arc::downgrade(&evaluator);
            handles.push(std::thread::spawn(move || inference_loop(weak)));
        }
        *evaluator.workers.lock().unwrap() = handles;
        evaluator
    }

    pub fn evaluate(&self, state: &GameState) -> f32 {
        if let Some(v) = terminal_value(state) {
            return v;
        }
        let features = features::encode(state);
        self.network.value(&[features])[0]
    }

    pub fn evaluate_batch(&self, states: &[&GameState]) -> Vec<f32> {
        let mut out = vec![0f32; states.len()];
        let mut pending_idx = Vec::new();
        let mut pending_features = Vec::new();
        for (i, state) in states.iter().enumerate() {
            match terminal_value(state) {
                Some(v) => out[i] = v,
                None => {
                    pending_idx.push(i);
                    pending_features.push(features::encode(state));
                }
            }
        }
        if !pending_features.is_empty() {
            let values = self.network.value(&pending_features);
            for (idx, v) in pending_idx.into_iter().zip(values) {
                out[idx] = v;
            }
        }
        out
    }

    /// Blocks the calling thread until an inference worker completes this
    /// state's batch. `worker_id` selects which of the `config.num_threads`
    /// result slots to wait on; callers must each use a distinct id.
    pub fn evaluate_async(&self, state: &GameState, worker_id: usize) -> f32 {
        if let Some(v) = terminal_value(state) {
            return v;
        }
        let features = features::encode(state);
        self.enqueue_and_wait(vec![features], worker_id)[0]
    }

    pub fn evaluate_async_batch(&self, states: &[&GameState], worker_id: usize) -> Vec<f32> {
        let mut out = vec![0f32; states.len()];
        let mut pending_idx = Vec::new();
        let mut pending_features = Vec::new();
        for (i, state) in states.iter().enumerate() {
            match terminal_value(state) {
                Some(v) => out[i] = v,
                None => {
                    pending_idx.push(i);
                    pending_features.push(features::encode(state));
                }
            }
        }
        if !pending_features.is_empty() {
            let values = self.enqueue_and_wait(pending_features, worker_id);
            for (idx, v) in pending_idx.into_iter().zip(values) {
                out[idx] = v;
            }
        }
        out
    }

    fn enqueue_and_wait(&self, features: Vec<Vec<f32>>, worker_id: usize) -> Vec<f32> {
        let slot = &self.slots[worker_id];
        {
            let mut result = slot.result.lock().unwrap();
            *result = None;
        }
        {
            let mut queue = self.queue.lock().unwrap();
            queue.push_back(QueueItem { features, worker_id });
        }
        self.queue_cv.notify_one();

        let result = slot.result.lock().unwrap();
        let mut result = slot
            .cv
            .wait_while(result, |r| r.is_none())
            .unwrap();
        result.take().expect("condvar predicate guarantees Some")
    }

    fn process_batch(&self, batch: Vec<QueueItem>) {
        let mut all_features = Vec::new();
        let mut ranges = Vec::with_capacity(batch.len());
        for item in &batch {
            let start = all_features.len();
            all_features.extend(item.features.iter().cloned());
            ranges.push((start, all_features.len()));
        }
        let values = self.network.value(&all_features);

        for (item, (start, end)) in batch.into_iter().zip(ranges) {
            let slot = &self.slots[item.worker_id];
            {
                let mut result = slot.result.lock().unwrap();
                *result = Some(values[start..end].to_vec());
            }
            slot.cv.notify_one();
        }
    }
}

fn inference_loop(evaluator: Weak<Evaluator>) {
    loop {
        let Some(evaluator) = evaluator.upgrade() else {
            return;
        };
        let queue = evaluator.queue.lock().unwrap();
        let mut queue = evaluator
            .queue_cv
            .wait_while(queue, |q| q.is_empty() && !evaluator.should_finish.load(Ordering::SeqCst))
            .unwrap();
        if queue.is_empty() {
            return;
        }
        let batch: Vec<QueueItem> = queue.drain(..).collect();
        drop(queue);
        evaluator.process_batch(batch);
    }
}

impl Drop for Evaluator {
    fn drop(&mut self) {
        self.should_finish.store(true, Ordering::SeqCst);
        self.queue_cv.notify_all();
        let mut handles = self.workers.lock().unwrap();
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moves::Move;

    struct ConstantNetwork(f32);

    impl PolicyValueNetwork for ConstantNetwork {
        fn value(&self, batch: &[Vec<f32>]) -> Vec<f32> {
            vec![self.0; batch.len()]
        }
        fn policy(&self, batch: &[Vec<f32>]) -> Vec<Vec<f32>> {
            vec![vec![0.0; features::NUM_POLICY_SLOTS]; batch.len()]
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.num_threads = 2;
        config.evaluator_worker_count = 1;
        config
    }

    #[test]
    fn sync_evaluate_calls_network_for_nonterminal_state() {
        let evaluator = Evaluator::new(Arc::new(ConstantNetwork(0.42)), test_config());
        let state = GameState::initial();
        assert!((evaluator.evaluate(&state) - 0.42).abs() < f32::EPSILON);
    }

    #[test]
    fn async_evaluate_matches_sync_result() {
        let evaluator = Evaluator::new(Arc::new(ConstantNetwork(-0.2)), test_config());
        let s0 = GameState::initial();
        let s1 = GameState::apply(&s0, Move::parse("e2e4"));
        let sync_v = evaluator.evaluate(&s1);
        let async_v = evaluator.evaluate_async(&s1, 0);
        assert!((sync_v - async_v).abs() < f32::EPSILON);
    }

    #[test]
    fn async_batch_preserves_order_across_terminal_and_live_states() {
        let evaluator = Evaluator::new(Arc::new(ConstantNetwork(0.5)), test_config());
        let live = GameState::initial();

        let mut checkmate_board = crate::board::Board::empty();
        checkmate_board.put(0, 0, crate::piece::Piece::new(crate::piece::PieceKind::King, crate::piece::Side::Black));
        checkmate_board.put(1, 1, crate::piece::Piece::new(crate::piece::PieceKind::King, crate::piece::Side::White));
        checkmate_board.put(0, 7, crate::piece::Piece::new(crate::piece::PieceKind::Rook, crate::piece::Side::White));
        checkmate_board.put(1, 7, crate::piece::Piece::new(crate::piece::PieceKind::Rook, crate::piece::Side::White));
        let checkmated = GameState::from_parts_for_test(checkmate_board, crate::piece::Side::Black);

        let states: Vec<&GameState> = vec![&live, &checkmated];
        let values = evaluator.evaluate_async_batch(&states, 1);
        assert!((values[0] - 0.5).abs() < f32::EPSILON);
        assert!((values[1] - (-1.0)).abs() < f32::EPSILON);
    }
}
