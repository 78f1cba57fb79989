//! Neural-network boundary (SPEC_FULL.md §6.1).
//!
//! `PolicyValueNetwork` is the trait the Evaluator and MCTS consume; it
//! only ever sees flattened `(119, 8, 8)` feature batches, never a tensor
//! framework type, so the core can be linked against any backend. `ChessNet`
//! is a reference `burn` implementation grounded in the teacher's
//! `QuoridorNet`/`BurnPolicyValueNet` (`src/nn_bot.rs`), resized from the
//! teacher's 7-channel 9x9 Quoridor board to this crate's 119-channel 8x8
//! board and 4672-logit policy head. Per spec.md's Non-goals the network's
//! internal architecture is not a faithful AlphaZero reproduction — this
//! exists so the Evaluator and MCTS are exercisable end-to-end.

use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{self, Initializer, Relu};
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};

use crate::features::{FEATURE_LEN, NUM_PLANES, NUM_POLICY_SLOTS};

/// Pure function pair the Evaluator consumes. `value`/`policy` each take a
/// batch of flattened feature tensors (row-major `(119, 8, 8)`, length
/// [`FEATURE_LEN`] each).
pub trait PolicyValueNetwork: Send + Sync {
    fn value(&self, batch: &[Vec<f32>]) -> Vec<f32>;
    fn policy(&self, batch: &[Vec<f32>]) -> Vec<Vec<f32>>;
}

const CONV_CHANNELS: usize = 64;
// Two valid (no padding) 3x3 convolutions shrink an 8x8 board to 4x4.
const FLATTENED_CONV_SIZE: usize = CONV_CHANNELS * 4 * 4;

#[derive(Module, Debug)]
pub struct ChessNetModule<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    fc_policy: nn::Linear<B>,
    fc_value1: nn::Linear<B>,
    fc_value2: nn::Linear<B>,
}

#[derive(Clone, Debug)]
pub struct ChessNetOutput<B: Backend> {
    pub policy: Tensor<B, 2>, // [batch, 4672]
    pub value: Tensor<B, 2>,  // [batch, 1]
}

impl<B: Backend> ChessNetModule<B> {
    pub fn new(device: &B::Device) -> Self {
        let conv_cfg = Conv2dConfig::new([NUM_PLANES, CONV_CHANNELS], [3, 3])
            .with_initializer(Initializer::KaimingUniform { gain: 1.0, fan_out_only: false });
        let conv1 = conv_cfg.init(device);

        let conv_cfg2 = Conv2dConfig::new([CONV_CHANNELS, CONV_CHANNELS], [3, 3])
            .with_initializer(Initializer::KaimingUniform { gain: 1.0, fan_out_only: false });
        let conv2 = conv_cfg2.init(device);

        let fc_policy = nn::LinearConfig::new(FLATTENED_CONV_SIZE, NUM_POLICY_SLOTS)
            .with_initializer(Initializer::KaimingUniform { gain: 1.0, fan_out_only: false })
            .init(device);

        let fc_value1 = nn::LinearConfig::new(FLATTENED_CONV_SIZE, CONV_CHANNELS)
            .with_initializer(Initializer::KaimingUniform { gain: 1.0, fan_out_only: false })
            .init(device);

        let fc_value2 = nn::LinearConfig::new(CONV_CHANNELS, 1)
            .with_initializer(Initializer::XavierNormal { gain: 1.0 })
            .init(device);

        Self {
            conv1,
            conv2,
            fc_policy,
            fc_value1,
            fc_value2,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> ChessNetOutput<B> {
        let relu = Relu::new();
        let x = self.conv1.forward(x);
        let x = relu.forward(x);
        let x = self.conv2.forward(x);
        let x = relu.forward(x);

        let x = x.flatten(1, 3);

        let policy = self.fc_policy.forward(x.clone());

        let value = self.fc_value1.forward(x);
        let value = relu.forward(value);
        let value = self.fc_value2.forward(value).tanh();

        ChessNetOutput { policy, value }
    }
}

pub struct ChessNet<B: Backend> {
    model: ChessNetModule<B>,
    device: B::Device,
}

impl<B: Backend> ChessNet<B> {
    pub fn new(device: B::Device) -> Self {
        let model = ChessNetModule::new(&device);
        Self { model, device }
    }
}

fn encode_batch_to_tensor<B: Backend>(batch: &[Vec<f32>], device: &B::Device) -> Tensor<B, 4> {
    let batch_size = batch.len();
    let mut flat = Vec::with_capacity(batch_size * FEATURE_LEN);
    for features in batch {
        assert_eq!(features.len(), FEATURE_LEN, "feature tensor has wrong length");
        flat.extend_from_slice(features);
    }
    Tensor::<B, 4>::from_data(
        TensorData::new(flat, [batch_size, NUM_PLANES, 8, 8]),
        device,
    )
}

impl<B: Backend> PolicyValueNetwork for ChessNet<B> {
    fn value(&self, batch: &[Vec<f32>]) -> Vec<f32> {
        let input = encode_batch_to_tensor::<B>(batch, &self.device);
        let out = self.model.forward(input);
        out.value.into_data().to_vec().expect("value tensor is f32")
    }

    fn policy(&self, batch: &[Vec<f32>]) -> Vec<Vec<f32>> {
        let input = encode_batch_to_tensor::<B>(batch, &self.device);
        let out = self.model.forward(input);
        out.policy
            .iter_dim(0)
            .map(|row| row.into_data().to_vec().expect("policy tensor is f32"))
            .collect()
    }
}
