use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{Linear, LinearConfig, Relu};
use burn::prelude::*;

use crate::ai::state_encoding::CHANNELS;
use crate::game::COLS;

/// Flattened size after the two unpadded 3x3 convolutions: 64 x 2 x 3.
const CONV_OUT: usize = 64 * 2 * 3;

/// Action-value network for Connect Four.
///
/// ```text
/// Input:  [batch, 3, 6, 7]
/// Conv1:  3 -> 32 channels, 3x3 kernel  =>  [batch, 32, 4, 5]
/// ReLU
/// Conv2:  32 -> 64 channels, 3x3 kernel =>  [batch, 64, 2, 3]
/// ReLU
/// Flatten: 64*2*3 = 384
/// FC1:    384 -> hidden, ReLU
/// FC2:    hidden -> 7  (one value per column)
/// ```
#[derive(Module, Debug)]
pub struct QNetwork<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    fc1: Linear<B>,
    fc2: Linear<B>,
    relu: Relu,
}

#[derive(Config, Debug)]
pub struct QNetworkConfig {
    #[config(default = 128)]
    pub hidden_size: usize,
}

impl QNetworkConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> QNetwork<B> {
        QNetwork {
            conv1: Conv2dConfig::new([CHANNELS, 32], [3, 3]).init(device),
            conv2: Conv2dConfig::new([32, 64], [3, 3]).init(device),
            fc1: LinearConfig::new(CONV_OUT, self.hidden_size).init(device),
            fc2: LinearConfig::new(self.hidden_size, COLS).init(device),
            relu: Relu::new(),
        }
    }
}

impl<B: Backend> QNetwork<B> {
    /// Forward pass: input [batch, 3, 6, 7] -> output [batch, 7] action values.
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let batch_size = input.dims()[0];

        let x = self.relu.forward(self.conv1.forward(input));
        let x = self.relu.forward(self.conv2.forward(x));
        let x = x.reshape([batch_size, CONV_OUT]);
        let x = self.relu.forward(self.fc1.forward(x));
        self.fc2.forward(x)
    }
}
