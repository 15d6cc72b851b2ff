//! Options driving the morphism operators.
//!
//! Both option structs capture run-time knobs callers can tune without
//! swapping implementations; defaults mirror the behaviour expected when
//! morphing a network that should keep computing the same function.

use crate::layers::Activation;

/// Options for a widening call.
#[derive(Debug, Clone, PartialEq)]
pub struct WidenOptions {
    /// Add bounded uniform noise to duplicated producer units so they do not
    /// stay exact copies of each other under training.
    ///
    /// The first appended unit is always an exact copy; noise starts with the
    /// second. Disable for bit-for-bit reproducible function preservation.
    pub noise: bool,
}

impl Default for WidenOptions {
    fn default() -> Self {
        Self { noise: true }
    }
}

/// Options for a deepening call.
#[derive(Debug, Clone, PartialEq)]
pub struct DeepenOptions {
    /// Nonlinearity inserted between the producer and the new identity layer.
    pub nonlinearity: Option<Activation>,
    /// Insert an identity-initialised batch-normalisation stage before the
    /// nonlinearity.
    pub batch_norm: bool,
    /// Perturb the identity weights with Gaussian noise (sigma = 5% of the
    /// identity tensor's own standard deviation) to help subsequent training.
    pub noise: bool,
    /// Rescale each output unit of the producer to unit L2 norm before
    /// stacking. This deliberately changes the producer's output scale, so it
    /// trades exact function preservation for normalised filters.
    pub weight_norm: bool,
}

impl Default for DeepenOptions {
    fn default() -> Self {
        Self {
            nonlinearity: None,
            batch_norm: false,
            noise: true,
            weight_norm: false,
        }
    }
}
