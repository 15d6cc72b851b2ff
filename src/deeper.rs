//! Depth insertion ("Net2Deeper").
//!
//! Splices a freshly built layer after an existing one, initialised as an
//! identity transform so the stack keeps computing the producer's function
//! at insertion time. Fully-connected layers get an identity weight matrix;
//! convolutions get a zero kernel with a unit tap at the centre of each
//! channel's own filter, which requires odd kernel extents.

use candle_core::{DType, Tensor};
use rand::Rng;

use crate::core::errors::{MorphError, Result};
use crate::core::DeepenOptions;
use crate::layers::{
    Activation, BatchNorm, Conv2d, Conv2dConfig, Layer, Linear, LinearConfig,
};
use crate::noise;

/// Standard deviation of the optional identity perturbation, relative to the
/// identity weight tensor's own standard deviation.
const IDENTITY_NOISE_RATIO: f64 = 5e-2;

/// One stage of a deepened stack.
#[derive(Debug, Clone)]
pub enum StackEntry {
    Layer(Layer),
    BatchNorm(BatchNorm),
    Activation(Activation),
}

/// Ordered replacement for a single layer after deepening:
/// `[producer, (batch norm), (nonlinearity), new identity layer]`.
#[derive(Debug, Clone)]
pub struct LayerStack {
    entries: Vec<StackEntry>,
}

impl LayerStack {
    pub fn entries(&self) -> &[StackEntry] {
        &self.entries
    }

    /// The freshly inserted layer (always the last entry).
    pub fn inserted(&self) -> Option<&Layer> {
        match self.entries.last() {
            Some(StackEntry::Layer(layer)) => Some(layer),
            _ => None,
        }
    }

    /// Runs the whole stack in eval mode.
    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let mut current = input.clone();
        for entry in &self.entries {
            current = match entry {
                StackEntry::Layer(Layer::Conv2d(conv)) => conv.forward(&current)?,
                StackEntry::Layer(Layer::Linear(linear)) => linear.forward(&current)?,
                StackEntry::Layer(Layer::Conv3d(_)) => {
                    return Err(MorphError::unsupported("stack forward", "Conv3d"))
                }
                StackEntry::BatchNorm(bundle) => bundle.forward(&current)?,
                StackEntry::Activation(activation) => activation.apply(&current)?,
            };
        }
        Ok(current)
    }
}

/// Builds a stack that replaces `layer` with `layer` followed by an
/// identity-initialised copy of its output shape.
///
/// Only [`Layer::Conv2d`] and [`Layer::Linear`] are supported; anything else
/// is a programming error on the caller's side and fails with
/// [`MorphError::UnsupportedLayerKind`].
pub fn deepen(layer: &Layer, opts: &DeepenOptions, rng: &mut impl Rng) -> Result<LayerStack> {
    let stack = match layer {
        Layer::Linear(m) => deepen_linear(m, opts, rng)?,
        Layer::Conv2d(m) => deepen_conv2d(m, opts, rng)?,
        other => {
            return Err(MorphError::unsupported(
                "deepen",
                other.kind().to_string(),
            ))
        }
    };
    log::debug!(
        "net2deeper {}: {} entries, noise={}, batch_norm={}",
        layer.kind(),
        stack.entries().len(),
        opts.noise,
        opts.batch_norm,
    );
    Ok(stack)
}

fn deepen_linear(m: &Linear, opts: &DeepenOptions, rng: &mut impl Rng) -> Result<LayerStack> {
    let out = m.config().out_features;
    let device = m.weight().device();

    let mut weight = identity_matrix(out, device)?;
    if opts.noise {
        weight = noise::gaussian_perturb(&weight, IDENTITY_NOISE_RATIO, rng)?;
    }
    let bias = Tensor::zeros(out, DType::F32, device)?;
    let inserted = Linear::new(LinearConfig::new(out, out), weight, bias)?;

    let producer = if opts.weight_norm {
        Linear::new(
            *m.config(),
            normalize_output_units(m.weight())?,
            m.bias().clone(),
        )?
    } else {
        m.clone()
    };

    let mut entries = vec![StackEntry::Layer(Layer::Linear(producer))];
    if opts.batch_norm {
        entries.push(StackEntry::BatchNorm(BatchNorm::identity(out, device)?));
    }
    if let Some(activation) = opts.nonlinearity {
        entries.push(StackEntry::Activation(activation));
    }
    entries.push(StackEntry::Layer(Layer::Linear(inserted)));
    Ok(LayerStack { entries })
}

fn deepen_conv2d(m: &Conv2d, opts: &DeepenOptions, rng: &mut impl Rng) -> Result<LayerStack> {
    let (kernel_h, kernel_w) = m.config().kernel;
    if kernel_h % 2 == 0 {
        return Err(MorphError::InvalidKernelSize {
            axis: 0,
            extent: kernel_h,
        });
    }
    if kernel_w % 2 == 0 {
        return Err(MorphError::InvalidKernelSize {
            axis: 1,
            extent: kernel_w,
        });
    }

    let channels = m.config().out_channels;
    let device = m.weight().device();

    let mut weight = identity_kernel(channels, kernel_h, kernel_w, device)?;
    if opts.noise {
        weight = noise::gaussian_perturb(&weight, IDENTITY_NOISE_RATIO, rng)?;
    }
    let bias = Tensor::zeros(channels, DType::F32, device)?;
    let inserted = Conv2d::new(
        Conv2dConfig::same_padded(channels, channels, (kernel_h, kernel_w)),
        weight,
        bias,
    )?;

    let producer = if opts.weight_norm {
        Conv2d::new(
            *m.config(),
            normalize_output_units(m.weight())?,
            m.bias().clone(),
        )?
    } else {
        m.clone()
    };

    let mut entries = vec![StackEntry::Layer(Layer::Conv2d(producer))];
    if opts.batch_norm {
        entries.push(StackEntry::BatchNorm(BatchNorm::identity(channels, device)?));
    }
    if let Some(activation) = opts.nonlinearity {
        entries.push(StackEntry::Activation(activation));
    }
    entries.push(StackEntry::Layer(Layer::Conv2d(inserted)));
    Ok(LayerStack { entries })
}

/// `n x n` identity matrix.
fn identity_matrix(n: usize, device: &candle_core::Device) -> Result<Tensor> {
    let mut data = vec![0f32; n * n];
    for i in 0..n {
        data[i * n + i] = 1.0;
    }
    Ok(Tensor::from_vec(data, (n, n), device)?)
}

/// Per-channel identity convolution kernel: zero everywhere except a unit tap
/// connecting each channel to itself at the kernel centre.
fn identity_kernel(
    channels: usize,
    kernel_h: usize,
    kernel_w: usize,
    device: &candle_core::Device,
) -> Result<Tensor> {
    let mut data = vec![0f32; channels * channels * kernel_h * kernel_w];
    let (center_h, center_w) = (kernel_h / 2, kernel_w / 2);
    for i in 0..channels {
        let offset = ((i * channels + i) * kernel_h + center_h) * kernel_w + center_w;
        data[offset] = 1.0;
    }
    Ok(Tensor::from_vec(
        data,
        (channels, channels, kernel_h, kernel_w),
        device,
    )?)
}

/// Rescales each output unit of `weight` (axis 0) to unit L2 norm.
fn normalize_output_units(weight: &Tensor) -> Result<Tensor> {
    let out = weight.dim(0)?;
    let flat = weight.reshape((out, ()))?;
    let norms = (flat.sqr()?.sum_keepdim(1)?.sqrt()? + 1e-12)?;
    let normalized = flat.broadcast_div(&norms)?;
    Ok(normalized.reshape(weight.dims().to_vec())?)
}
