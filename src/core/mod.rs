//! Shared types for the morphism operators.
//!
//! Operators dispatch on [`LayerKind`], a closed enumeration of the layer
//! families the surgery understands. Weight tensors follow the channel-first
//! convention `(out_units, in_units, spatial...)` everywhere inside the crate;
//! the channel-last convention only appears at the verification boundary via
//! [`WeightLayout`].

pub mod config;
pub mod errors;

use std::fmt;

pub use config::{DeepenOptions, WidenOptions};
pub use errors::{MorphError, Result};

/// Scale of the symmetry-breaking noise relative to the peak-to-peak range of
/// the weights it is added to.
pub const NOISE_RATIO: f64 = 1e-5;

/// Absolute tolerance used by the brute-force equivalence check.
pub const ERROR_TOLERANCE: f64 = 1e-3;

/// Closed set of layer kinds the operators act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerKind {
    Conv2d,
    Conv3d,
    Linear,
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerKind::Conv2d => f.write_str("Conv2d"),
            LayerKind::Conv3d => f.write_str("Conv3d"),
            LayerKind::Linear => f.write_str("Linear"),
        }
    }
}

/// Axis convention of a 4-D convolution weight tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightLayout {
    /// `(out_channels, in_channels, kernel_h, kernel_w)`, the layout the
    /// crate's own descriptors use.
    ChannelsFirst,
    /// `(kernel_h, kernel_w, in_channels, out_channels)`.
    ChannelsLast,
}
