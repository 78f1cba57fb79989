//! PUCT tree search with virtual-loss batching (SPEC_FULL.md §4.5).
//!
//! One `Mcts` is created per move decision and owns a monotonically growing
//! node arena (`Vec<Node>`, stable integer indices), exactly the shape
//! `original_source/src/mcts.h`'s `std::vector<std::unique_ptr<MCTSNode>>
//! nodes_` takes — indices stand in for the raw parent/child pointers
//! `mcts_node.h` uses, per SPEC_FULL.md §9's "never use uncounted pointers"
//! note. Selection and backup are expressed as loops (`original_source`'s
//! `MCTS::Select`/`MCTS::Backup` are loops too), never recursion.
//!
//! Policy priors at expansion follow `original_source/src/mcts.cc`'s
//! `Expand` exactly: there is no per-move network policy consulted here
//! (`MCTSNode` is constructed with a flat `/*prior=*/1` at the root and
//! nothing richer below it) — see spec.md §9's open question. Only the
//! root's children receive Dirichlet-noise mixing (Node invariants, §3);
//! every other expansion's children simply inherit the parent's own prior
//! scalar unchanged, which is this system's stand-in for the "uniform
//! default prior" spec.md §6 describes for a policy head that isn't
//! consulted at search time.

use std::rc::Rc;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Dirichlet, Distribution};

use crate::config::Config;
use crate::evaluator::Evaluator;
use crate::features::{self, NUM_POLICY_SLOTS};
use crate::game_state::GameState;
use crate::moves::Move;

struct Node {
    state: Rc<GameState>,
    parent: Option<usize>,
    children: Vec<(usize, Move)>,
    prior: f32,
    w: f32,
    n: u32,
    v: f32,
    computed: bool,
    virtual_loss: f32,
    virtual_visits: u32,
}

impl Node {
    fn new(state: Rc<GameState>, parent: Option<usize>, prior: f32) -> Self {
        Self {
            state,
            parent,
            children: Vec::new(),
            prior,
            w: 0.0,
            n: 0,
            v: 0.0,
            computed: false,
            virtual_loss: 0.0,
            virtual_visits: 0,
        }
    }

    /// `n + virtual_visits`, used for both the PUCT denominator and Q.
    fn effective_visits(&self) -> f32 {
        self.n as f32 + self.virtual_visits as f32
    }

    /// `w/effective_visit + virtual_loss` (SPEC_FULL.md §3 invariants).
    fn effective_q(&self) -> f32 {
        let ev = self.effective_visits();
        if ev > 0.0 {
            self.w / ev + self.virtual_loss
        } else {
            self.virtual_loss
        }
    }

    /// Plain `w/n`, used once search is over and virtual loss is irrelevant.
    fn q(&self) -> f32 {
        if self.n > 0 {
            self.w / self.n as f32
        } else {
            0.0
        }
    }
}

/// One search rooted at a caller-supplied state. Not `Send`: a `GameState`
/// chain (`Rc`-linked) lives entirely on the worker thread that owns this
/// search; only flattened feature tensors cross into the shared `Evaluator`.
pub struct Mcts {
    nodes: Vec<Node>,
    root: usize,
    evaluator: Arc<Evaluator>,
    config: Config,
    worker_id: usize,
    root_noise: bool,
    rng: StdRng,
}

fn sample_dirichlet(n: usize, alpha: f32, rng: &mut StdRng) -> Vec<f32> {
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![1.0];
    }
    let dist = Dirichlet::new(&vec![alpha as f64; n]).expect("dirichlet alpha must be positive");
    dist.sample(rng).into_iter().map(|v| v as f32).collect()
}

impl Mcts {
    /// `root_noise` disables Dirichlet mixing for deterministic arena play
    /// (SPEC_FULL.md §4.7: "deterministic MCTS with no Dirichlet noise").
    pub fn new(
        root_state: Rc<GameState>,
        evaluator: Arc<Evaluator>,
        config: Config,
        worker_id: usize,
        seed: u64,
        root_noise: bool,
    ) -> Self {
        let root_node = Node::new(root_state, None, 1.0);
        Self {
            nodes: vec![root_node],
            root: 0,
            evaluator,
            config,
            worker_id,
            root_noise,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Runs the configured number of iterations in whichever mode
    /// `config.do_batch_mcts` selects.
    pub fn run(&mut self, num_iterations: u32) {
        self.ensure_root_expanded();
        if self.config.do_batch_mcts {
            self.run_batch(num_iterations);
        } else {
            self.run_single(num_iterations);
        }
    }

    /// Expands and evaluates the root once, outside the iteration count.
    /// Without this, the first of the `K` iterations would pick the bare
    /// root as its own leaf (no children exist yet) and back up only the
    /// root itself, leaving `Σ visits(child) == K - 1` instead of `K` for a
    /// non-draw root (spec.md §8). No-op for a root that is already
    /// expanded or is a draw/checkmate (which never gets children at all).
    fn ensure_root_expanded(&mut self) {
        if !self.nodes[self.root].children.is_empty() {
            return;
        }
        self.expand(self.root);
        self.maybe_precompute(self.root);
        if !self.nodes[self.root].computed {
            let v = self.evaluate_one(self.root);
            self.nodes[self.root].v = v;
            self.nodes[self.root].computed = true;
        }
    }

    fn run_single(&mut self, num_iterations: u32) {
        for _ in 0..num_iterations {
            let (leaf, path) = self.select_leaf();
            self.expand(leaf);
            self.maybe_precompute(leaf);
            if !self.nodes[leaf].computed {
                let v = self.evaluate_one(leaf);
                self.nodes[leaf].v = v;
                self.nodes[leaf].computed = true;
            }
            let v = self.nodes[leaf].v;
            self.backup(&path, v);
        }
    }

    fn run_batch(&mut self, num_iterations: u32) {
        let mut done = 0u32;
        while done < num_iterations {
            let mut pending: Vec<(usize, Vec<usize>)> = Vec::new();
            while pending.len() < self.config.mcts_batch_leaf_size && done < num_iterations {
                let (leaf, path) = self.select_leaf();
                self.expand(leaf);
                self.maybe_precompute(leaf);
                done += 1;
                if self.nodes[leaf].computed {
                    let v = self.nodes[leaf].v;
                    self.backup(&path, v);
                } else {
                    self.apply_virtual_loss(&path);
                    pending.push((leaf, path));
                }
            }
            if pending.is_empty() {
                continue;
            }
            let leaves: Vec<usize> = pending.iter().map(|(l, _)| *l).collect();
            let values = self.evaluate_many(&leaves);
            for ((leaf, path), v) in pending.into_iter().zip(values) {
                self.nodes[leaf].v = v;
                self.nodes[leaf].computed = true;
                self.clear_virtual_loss(&path);
                self.backup(&path, v);
            }
        }
    }

    /// Descends from the root, maximizing `Q + U` at each internal node;
    /// a never-visited child is taken immediately (first sight, tie-broken
    /// by the shuffled child order from expansion). Returns the leaf and the
    /// full root-to-leaf path.
    fn select_leaf(&self) -> (usize, Vec<usize>) {
        let mut path = vec![self.root];
        let mut current = self.root;
        loop {
            let node = &self.nodes[current];
            if node.children.is_empty() {
                return (current, path);
            }
            let parent_visits = node.effective_visits();
            let mut best_idx = None;
            let mut best_score = f32::NEG_INFINITY;
            for &(child_idx, _) in &node.children {
                let child = &self.nodes[child_idx];
                if child.effective_visits() == 0.0 {
                    best_idx = Some(child_idx);
                    break;
                }
                let u = child.prior * parent_visits.sqrt() / (1.0 + child.effective_visits());
                let score = child.effective_q() + u;
                if score > best_score {
                    best_score = score;
                    best_idx = Some(child_idx);
                }
            }
            current = best_idx.expect("internal node always has at least one child");
            path.push(current);
        }
    }

    /// Generates every legal child of `node_idx`'s state. No-ops for a draw
    /// or checkmated leaf (spec.md §4.5: "For a leaf whose state is not a
    /// draw..."); those stay childless and get re-selected on subsequent
    /// iterations, same as `original_source`'s `Evaluator::Evalulate`
    /// short-circuit handles the terminal value without ever expanding.
    fn expand(&mut self, node_idx: usize) {
        let state = Rc::clone(&self.nodes[node_idx].state);
        if state.is_draw() {
            return;
        }
        let legal: Vec<Move> = state.legal_moves().to_vec();
        if legal.is_empty() {
            return;
        }

        let parent_prior = self.nodes[node_idx].prior;
        let is_root = self.nodes[node_idx].parent.is_none();
        let child_priors: Vec<f32> = if is_root && self.root_noise {
            let noise = sample_dirichlet(legal.len(), self.config.dirichlet_alpha, &mut self.rng);
            noise
                .into_iter()
                .map(|n| 0.75 * parent_prior + 0.25 * n)
                .collect()
        } else {
            vec![parent_prior; legal.len()]
        };

        let mut order: Vec<usize> = (0..legal.len()).collect();
        order.shuffle(&mut self.rng);

        let mut children = Vec::with_capacity(legal.len());
        for i in order {
            let mv = legal[i];
            let child_state = GameState::apply(&state, mv);
            let child_idx = self.nodes.len();
            self.nodes.push(Node::new(child_state, Some(node_idx), child_priors[i]));
            children.push((child_idx, mv));
        }
        self.nodes[node_idx].children = children;
    }

    /// Eagerly batch-evaluates a freshly expanded node's children when the
    /// branch looks likely to be explored broadly: either `node_idx` is the
    /// root, or its parent has already accumulated
    /// `precompute_batch_parent_min_visits` visits. Children are evaluated
    /// in chunks of `config.mcts_inference_batch_size` rather than one
    /// unbounded call, so that option actually bounds the batch size the
    /// network sees during precomputation.
    fn maybe_precompute(&mut self, node_idx: usize) {
        let should = match self.nodes[node_idx].parent {
            None => true,
            Some(parent) => self.nodes[parent].n >= self.config.precompute_batch_parent_min_visits,
        };
        if !should {
            return;
        }
        let uncomputed: Vec<usize> = self.nodes[node_idx]
            .children
            .iter()
            .map(|(c, _)| *c)
            .filter(|c| !self.nodes[*c].computed)
            .collect();
        if uncomputed.is_empty() {
            return;
        }
        let batch_size = self.config.mcts_inference_batch_size.max(1);
        for chunk in uncomputed.chunks(batch_size) {
            let values = self.evaluate_many(chunk);
            for (&child, v) in chunk.iter().zip(values) {
                self.nodes[child].v = v;
                self.nodes[child].computed = true;
            }
        }
    }

    fn evaluate_one(&self, node_idx: usize) -> f32 {
        let state = self.nodes[node_idx].state.as_ref();
        if self.config.use_async_inference {
            self.evaluator.evaluate_async(state, self.worker_id)
        } else {
            self.evaluator.evaluate(state)
        }
    }

    fn evaluate_many(&self, node_indices: &[usize]) -> Vec<f32> {
        let states: Vec<&GameState> = node_indices.iter().map(|&i| self.nodes[i].state.as_ref()).collect();
        if self.config.use_async_inference {
            self.evaluator.evaluate_async_batch(&states, self.worker_id)
        } else {
            self.evaluator.evaluate_batch(&states)
        }
    }

    /// Adds `config.mcts_virtual_loss` (negative) to every node on `path`
    /// and marks it queued, discouraging other iterations of the same batch
    /// from re-selecting the same sub-tree before a real value is known.
    fn apply_virtual_loss(&mut self, path: &[usize]) {
        for &idx in path {
            let node = &mut self.nodes[idx];
            node.virtual_loss += self.config.mcts_virtual_loss;
            node.virtual_visits += 1;
        }
    }

    fn clear_virtual_loss(&mut self, path: &[usize]) {
        for &idx in path {
            let node = &mut self.nodes[idx];
            node.virtual_loss -= self.config.mcts_virtual_loss;
            node.virtual_visits -= 1;
        }
    }

    /// Propagates `-leaf_value` up to the root, negating sign at every step
    /// (the side to move alternates), incrementing `n` and adding the
    /// (signed) value to `w` at each node on the path.
    fn backup(&mut self, path: &[usize], leaf_value: f32) {
        let mut v = -leaf_value;
        for &idx in path.iter().rev() {
            let node = &mut self.nodes[idx];
            node.n += 1;
            node.w += v;
            v = -v;
        }
    }

    /// `deterministic`: max visit count, ties broken by max `Q`. Otherwise,
    /// sample a child with probability proportional to its visit count.
    pub fn best_move(&self, deterministic: bool, rng: &mut impl Rng) -> Move {
        let root = &self.nodes[self.root];
        assert!(!root.children.is_empty(), "best_move called on an unexpanded root");

        if deterministic {
            root.children
                .iter()
                .max_by(|a, b| {
                    let (na, nb) = (self.nodes[a.0].n, self.nodes[b.0].n);
                    na.cmp(&nb).then_with(|| {
                        self.nodes[a.0]
                            .q()
                            .partial_cmp(&self.nodes[b.0].q())
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
                })
                .map(|(_, mv)| *mv)
                .expect("root has children")
        } else {
            let weights: Vec<u32> = root.children.iter().map(|(c, _)| self.nodes[*c].n).collect();
            if weights.iter().all(|w| *w == 0) {
                return root.children[rng.random_range(0..root.children.len())].1;
            }
            let dist = rand::distr::weighted::WeightedIndex::new(&weights)
                .expect("at least one child has a nonzero visit count");
            root.children[dist.sample(rng)].1
        }
    }

    /// Length-[`NUM_POLICY_SLOTS`] training target: `visits_i / sum(visits)`
    /// at each root child's move slot, zero elsewhere.
    pub fn policy_vector(&self) -> Vec<f32> {
        let mut policy = vec![0f32; NUM_POLICY_SLOTS];
        let root = &self.nodes[self.root];
        let total: u32 = root.children.iter().map(|(c, _)| self.nodes[*c].n).sum();
        if total == 0 {
            return policy;
        }
        for &(c, mv) in &root.children {
            let slot = features::encode_move(mv) as usize;
            policy[slot] = self.nodes[c].n as f32 / total as f32;
        }
        policy
    }

    #[cfg(test)]
    fn root_visits(&self) -> u32 {
        self.nodes[self.root].n
    }

    #[cfg(test)]
    fn child_visit_sum(&self) -> u32 {
        self.nodes[self.root].children.iter().map(|(c, _)| self.nodes[*c].n).sum()
    }

    #[cfg(test)]
    fn all_virtual_state_cleared(&self) -> bool {
        self.nodes.iter().all(|n| n.virtual_visits == 0 && n.virtual_loss == 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::PolicyValueNetwork;

    /// Deterministic stand-in for a trained network: always reports a fixed
    /// value and uniform policy, so MCTS tests exercise tree mechanics
    /// without depending on (or training) a real `burn` model.
    struct FixedValueNetwork {
        value: f32,
    }

    impl PolicyValueNetwork for FixedValueNetwork {
        fn value(&self, batch: &[Vec<f32>]) -> Vec<f32> {
            vec![self.value; batch.len()]
        }
        fn policy(&self, batch: &[Vec<f32>]) -> Vec<Vec<f32>> {
            vec![vec![0.0; NUM_POLICY_SLOTS]; batch.len()]
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.do_batch_mcts = false;
        config.use_async_inference = false;
        config.num_threads = 1;
        config
    }

    fn test_evaluator(config: &Config) -> Arc<Evaluator> {
        Evaluator::new(Arc::new(FixedValueNetwork { value: 0.1 }), config.clone())
    }

    #[test]
    fn root_visit_count_matches_iteration_count() {
        let config = test_config();
        let evaluator = test_evaluator(&config);
        let mut mcts = Mcts::new(GameState::initial(), evaluator, config, 0, 42, true);
        mcts.run(30);
        assert_eq!(mcts.root_visits(), 30);
        // The root is expanded and evaluated once before any of the 30
        // iterations runs, so every iteration descends into a real child
        // and the child visit sum matches the iteration count exactly
        // (spec.md §8).
        assert_eq!(mcts.child_visit_sum(), 30);
    }

    #[test]
    fn batch_mode_clears_virtual_loss_after_every_round() {
        let mut config = test_config();
        config.do_batch_mcts = true;
        config.mcts_batch_leaf_size = 4;
        let evaluator = test_evaluator(&config);
        let mut mcts = Mcts::new(GameState::initial(), evaluator, config, 0, 7, true);
        mcts.run(40);
        assert!(mcts.all_virtual_state_cleared());
    }

    #[test]
    fn deterministic_seed_reproduces_policy_vector() {
        let config = test_config();
        let mut outputs = Vec::new();
        for _ in 0..2 {
            let evaluator = test_evaluator(&config);
            let mut mcts = Mcts::new(GameState::initial(), evaluator, config.clone(), 0, 1234, true);
            mcts.run(20);
            outputs.push(mcts.policy_vector());
        }
        assert_eq!(outputs[0], outputs[1]);
    }

    #[test]
    fn move_selection_varies_across_seeds() {
        let config = test_config();
        let mut rng = StdRng::seed_from_u64(99);
        let mut chosen = std::collections::HashSet::new();
        for seed in 0..10u64 {
            let evaluator = test_evaluator(&config);
            let mut mcts = Mcts::new(GameState::initial(), evaluator, config.clone(), 0, seed, true);
            mcts.run(2);
            chosen.insert(mcts.best_move(false, &mut rng).to_uci());
        }
        assert!(chosen.len() >= 2, "expected child-order shuffling to produce move variety");
    }

    #[test]
    fn best_move_deterministic_prefers_max_visits() {
        let config = test_config();
        let evaluator = test_evaluator(&config);
        let mut mcts = Mcts::new(GameState::initial(), evaluator, config, 0, 5, true);
        mcts.run(50);
        let mut rng = StdRng::seed_from_u64(1);
        let mv = mcts.best_move(true, &mut rng);
        let root = &mcts.nodes[mcts.root];
        let max_n = root.children.iter().map(|(c, _)| mcts.nodes[*c].n).max().unwrap();
        let chosen_n = root
            .children
            .iter()
            .find(|(_, m)| *m == mv)
            .map(|(c, _)| mcts.nodes[*c].n)
            .unwrap();
        assert_eq!(chosen_n, max_n);
    }

    #[test]
    fn precompute_evaluates_children_in_chunks_of_the_configured_batch_size() {
        use std::sync::Mutex;

        struct RecordingNetwork {
            batch_sizes: Mutex<Vec<usize>>,
        }

        impl PolicyValueNetwork for RecordingNetwork {
            fn value(&self, batch: &[Vec<f32>]) -> Vec<f32> {
                self.batch_sizes.lock().unwrap().push(batch.len());
                vec![0.0; batch.len()]
            }
            fn policy(&self, batch: &[Vec<f32>]) -> Vec<Vec<f32>> {
                vec![vec![0.0; NUM_POLICY_SLOTS]; batch.len()]
            }
        }

        let mut config = test_config();
        config.mcts_inference_batch_size = 8;
        let network = Arc::new(RecordingNetwork {
            batch_sizes: Mutex::new(Vec::new()),
        });
        let evaluator = Evaluator::new(Arc::clone(&network), config.clone());
        // The starting position has 20 legal moves, so the root's own
        // precompute pass (always triggered, parent == None) must split
        // into ceil(20/8) == 3 chunks of at most 8 rather than one
        // unbounded call of 20.
        let mut mcts = Mcts::new(GameState::initial(), evaluator, config.clone(), 0, 3, true);
        mcts.run(1);

        let sizes = network.batch_sizes.lock().unwrap();
        assert!(
            sizes.iter().any(|&n| n == config.mcts_inference_batch_size),
            "expected a full-size chunk of {}, got {:?}",
            config.mcts_inference_batch_size,
            *sizes
        );
        assert!(
            sizes.iter().all(|&n| n <= config.mcts_inference_batch_size),
            "no batch should exceed mcts_inference_batch_size, got {:?}",
            *sizes
        );
    }
}
