//! Convolutional Q-network over stacked frames

use candle_core::{Device, Module, Tensor};
use candle_nn::{Conv2d, Conv2dConfig, Linear, VarBuilder};

use atari_dqn_core::{Observation, RLError};

/// Smallest frame side the convolution stack accepts
pub const MIN_FRAME_SIDE: usize = 36;

/// Convert a candle error into the workspace error type
pub(crate) fn tensor_error(err: candle_core::Error) -> RLError {
    RLError::Tensor(err.to_string())
}

fn conv_out(size: usize, kernel: usize, stride: usize) -> usize {
    (size - kernel) / stride + 1
}

/// Nature-DQN network: three convolutions followed by two dense layers.
///
/// Input is `(batch, frames, height, width)` with values in `[0, 1]`, output
/// is `(batch, num_actions)`.
#[derive(Debug, Clone)]
pub struct QNetwork {
    conv1: Conv2d,
    conv2: Conv2d,
    conv3: Conv2d,
    fc: Linear,
    out: Linear,
}

impl QNetwork {
    /// Build the network, registering its variables under `vb`
    pub fn new(vb: VarBuilder, input_shape: [usize; 3], num_actions: usize) -> candle_core::Result<Self> {
        let [frames, height, width] = input_shape;
        if height < MIN_FRAME_SIDE || width < MIN_FRAME_SIDE {
            candle_core::bail!("frames must be at least {MIN_FRAME_SIDE}x{MIN_FRAME_SIDE}, got {height}x{width}");
        }
        let stride = |stride| Conv2dConfig {
            stride,
            ..Conv2dConfig::default()
        };
        let conv1 = candle_nn::conv2d(frames, 32, 8, stride(4), vb.pp("conv1"))?;
        let conv2 = candle_nn::conv2d(32, 64, 4, stride(2), vb.pp("conv2"))?;
        let conv3 = candle_nn::conv2d(64, 64, 3, stride(1), vb.pp("conv3"))?;

        let side = |size| conv_out(conv_out(conv_out(size, 8, 4), 4, 2), 3, 1);
        let features = 64 * side(height) * side(width);
        let fc = candle_nn::linear(features, 512, vb.pp("fc"))?;
        let out = candle_nn::linear(512, num_actions, vb.pp("out"))?;
        Ok(Self {
            conv1,
            conv2,
            conv3,
            fc,
            out,
        })
    }
}

impl Module for QNetwork {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        xs.apply(&self.conv1)?
            .relu()?
            .apply(&self.conv2)?
            .relu()?
            .apply(&self.conv3)?
            .relu()?
            .flatten_from(1)?
            .apply(&self.fc)?
            .relu()?
            .apply(&self.out)
    }
}

/// Stack observations into one `(batch, ..shape)` tensor scaled to `[0, 1]`
pub fn observations_to_tensor<O: Observation>(states: &[O], device: &Device) -> candle_core::Result<Tensor> {
    let Some(first) = states.first() else {
        candle_core::bail!("cannot build a tensor from an empty batch");
    };
    let shape = first.shape();
    let mut data = Vec::with_capacity(states.len() * first.numel());
    for state in states {
        if state.shape() != shape {
            candle_core::bail!("observation shape {:?} differs from {:?}", state.shape(), shape);
        }
        state.write_normalized(&mut data);
    }
    let mut dims = Vec::with_capacity(shape.len() + 1);
    dims.push(states.len());
    dims.extend(shape);
    Tensor::from_vec(data, dims, device)
}
