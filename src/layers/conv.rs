//! Convolution layer descriptors.
//!
//! Weights follow the channel-first layout: `(out_channels, in_channels,
//! kernel_h, kernel_w)` for 2-D convolutions and `(out_channels, in_channels,
//! kernel_d, kernel_h, kernel_w)` for 3-D ones. The descriptors own their
//! tensors exclusively; the morphism operators never mutate them in place but
//! construct replacements through [`Conv2d::new`] / [`Conv3d::new`], which
//! re-validate every invariant.

use candle_core::Tensor;

use crate::core::errors::{MorphError, Result};
use crate::layers::checks;

/// Static configuration of a 2-D convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conv2dConfig {
    /// Incoming channel count.
    pub in_channels: usize,
    /// Produced channel count.
    pub out_channels: usize,
    /// Kernel extents `(kernel_h, kernel_w)`.
    pub kernel: (usize, usize),
    /// Zero padding `(pad_h, pad_w)` applied on both sides of each spatial
    /// axis. Stride and dilation are fixed at 1.
    pub padding: (usize, usize),
}

impl Conv2dConfig {
    /// Creates an unpadded configuration.
    pub fn new(in_channels: usize, out_channels: usize, kernel: (usize, usize)) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel,
            padding: (0, 0),
        }
    }

    /// Padding that preserves spatial extents for odd kernels.
    pub fn same_padded(in_channels: usize, out_channels: usize, kernel: (usize, usize)) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel,
            padding: (kernel.0 / 2, kernel.1 / 2),
        }
    }
}

/// A 2-D convolution layer: configuration plus owned weight and bias tensors.
#[derive(Debug, Clone)]
pub struct Conv2d {
    config: Conv2dConfig,
    weight: Tensor,
    bias: Tensor,
}

impl Conv2d {
    /// Constructs a descriptor from pre-existing parameters.
    pub fn new(config: Conv2dConfig, weight: Tensor, bias: Tensor) -> Result<Self> {
        checks::expect_dims(
            "conv2d.weight",
            &weight,
            &[
                config.out_channels,
                config.in_channels,
                config.kernel.0,
                config.kernel.1,
            ],
        )?;
        checks::expect_dims("conv2d.bias", &bias, &[config.out_channels])?;
        checks::expect_dtype("conv2d.weight", &weight)?;
        checks::expect_dtype("conv2d.bias", &bias)?;
        checks::expect_contiguous("conv2d.weight", &weight)?;
        Ok(Self {
            config,
            weight,
            bias,
        })
    }

    pub fn config(&self) -> &Conv2dConfig {
        &self.config
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn bias(&self) -> &Tensor {
        &self.bias
    }

    /// Applies the convolution to an input shaped `(batch, in_channels, h, w)`.
    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let (_, channels, _, _) = input.dims4().map_err(|_| {
            MorphError::shape("conv2d.input: expected (batch, in_channels, h, w)")
        })?;
        if channels != self.config.in_channels {
            return Err(MorphError::shape(format!(
                "conv2d.input: expected {} channels, got {channels}",
                self.config.in_channels
            )));
        }
        let (pad_h, pad_w) = self.config.padding;
        let padded = input
            .pad_with_zeros(2, pad_h, pad_h)?
            .pad_with_zeros(3, pad_w, pad_w)?;
        let out = padded.conv2d(&self.weight, 0, 1, 1, 1)?;
        let bias = self.bias.reshape((1, self.config.out_channels, 1, 1))?;
        Ok(out.broadcast_add(&bias)?)
    }
}

/// Static configuration of a 3-D convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conv3dConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    /// Kernel extents `(kernel_d, kernel_h, kernel_w)`.
    pub kernel: (usize, usize, usize),
}

impl Conv3dConfig {
    pub fn new(in_channels: usize, out_channels: usize, kernel: (usize, usize, usize)) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel,
        }
    }
}

/// A 3-D convolution layer.
///
/// Width surgery handles these like any other convolution; depth insertion
/// and brute-force verification do not, and reject them explicitly.
#[derive(Debug, Clone)]
pub struct Conv3d {
    config: Conv3dConfig,
    weight: Tensor,
    bias: Tensor,
}

impl Conv3d {
    pub fn new(config: Conv3dConfig, weight: Tensor, bias: Tensor) -> Result<Self> {
        checks::expect_dims(
            "conv3d.weight",
            &weight,
            &[
                config.out_channels,
                config.in_channels,
                config.kernel.0,
                config.kernel.1,
                config.kernel.2,
            ],
        )?;
        checks::expect_dims("conv3d.bias", &bias, &[config.out_channels])?;
        checks::expect_dtype("conv3d.weight", &weight)?;
        checks::expect_dtype("conv3d.bias", &bias)?;
        checks::expect_contiguous("conv3d.weight", &weight)?;
        Ok(Self {
            config,
            weight,
            bias,
        })
    }

    pub fn config(&self) -> &Conv3dConfig {
        &self.config
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn bias(&self) -> &Tensor {
        &self.bias
    }
}
