//! Layer descriptors the morphism operators act on.
//!
//! A [`Layer`] is a closed enum over the supported descriptor types; every
//! operator dispatches by matching on it (or on [`LayerKind`]) rather than on
//! anything name-based. Descriptors own their weight and bias tensors
//! exclusively; growing a layer always produces a new descriptor.

pub(crate) mod checks;

pub mod activation;
pub mod conv;
pub mod linear;
pub mod norm;

use candle_core::Tensor;

pub use activation::Activation;
pub use conv::{Conv2d, Conv2dConfig, Conv3d, Conv3dConfig};
pub use linear::{Linear, LinearConfig};
pub use norm::BatchNorm;

use crate::core::LayerKind;

/// A learnable layer in one of the supported families.
#[derive(Debug, Clone)]
pub enum Layer {
    Conv2d(Conv2d),
    Conv3d(Conv3d),
    Linear(Linear),
}

impl Layer {
    pub fn kind(&self) -> LayerKind {
        match self {
            Layer::Conv2d(_) => LayerKind::Conv2d,
            Layer::Conv3d(_) => LayerKind::Conv3d,
            Layer::Linear(_) => LayerKind::Linear,
        }
    }

    /// Output unit count: channels for convolutions, features for linears.
    pub fn output_units(&self) -> usize {
        match self {
            Layer::Conv2d(c) => c.config().out_channels,
            Layer::Conv3d(c) => c.config().out_channels,
            Layer::Linear(l) => l.config().out_features,
        }
    }

    /// Input unit count as seen by this layer.
    pub fn input_units(&self) -> usize {
        match self {
            Layer::Conv2d(c) => c.config().in_channels,
            Layer::Conv3d(c) => c.config().in_channels,
            Layer::Linear(l) => l.config().in_features,
        }
    }

    pub fn weight(&self) -> &Tensor {
        match self {
            Layer::Conv2d(c) => c.weight(),
            Layer::Conv3d(c) => c.weight(),
            Layer::Linear(l) => l.weight(),
        }
    }

    pub fn bias(&self) -> &Tensor {
        match self {
            Layer::Conv2d(c) => c.bias(),
            Layer::Conv3d(c) => c.bias(),
            Layer::Linear(l) => l.bias(),
        }
    }
}
