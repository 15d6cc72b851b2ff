//! Batch-normalisation parameter bundle.
//!
//! The bundle carries the four parallel per-feature arrays (running mean,
//! running variance, optional affine scale and shift). Every array's length
//! always equals [`BatchNorm::num_features`]; construction and every resize
//! re-validate this invariant. The forward pass applies the eval-mode
//! transform only; the morphism operators never train.

use candle_core::{DType, Tensor};

use crate::core::errors::{MorphError, Result};
use crate::layers::checks;

const DEFAULT_EPS: f64 = 1e-5;

/// Normalisation parameters tied to one layer's output dimension.
#[derive(Debug, Clone)]
pub struct BatchNorm {
    num_features: usize,
    running_mean: Tensor,
    running_var: Tensor,
    scale: Option<Tensor>,
    shift: Option<Tensor>,
    eps: f64,
}

impl BatchNorm {
    /// Constructs a bundle from pre-existing parameters.
    ///
    /// `scale` and `shift` form the affine pair: both present or both absent.
    pub fn new(
        num_features: usize,
        running_mean: Tensor,
        running_var: Tensor,
        scale: Option<Tensor>,
        shift: Option<Tensor>,
    ) -> Result<Self> {
        if scale.is_some() != shift.is_some() {
            return Err(MorphError::shape(
                "batch_norm: affine scale and shift must be supplied together",
            ));
        }
        checks::expect_dims("batch_norm.running_mean", &running_mean, &[num_features])?;
        checks::expect_dims("batch_norm.running_var", &running_var, &[num_features])?;
        if let Some(scale) = &scale {
            checks::expect_dims("batch_norm.scale", scale, &[num_features])?;
        }
        if let Some(shift) = &shift {
            checks::expect_dims("batch_norm.shift", shift, &[num_features])?;
        }
        Ok(Self {
            num_features,
            running_mean,
            running_var,
            scale,
            shift,
            eps: DEFAULT_EPS,
        })
    }

    /// A bundle that does not alter values: mean 0, variance 1, scale 1,
    /// shift 0.
    pub fn identity(num_features: usize, device: &candle_core::Device) -> Result<Self> {
        let running_mean = Tensor::zeros(num_features, DType::F32, device)?;
        let running_var = Tensor::ones(num_features, DType::F32, device)?;
        let scale = Tensor::ones(num_features, DType::F32, device)?;
        let shift = Tensor::zeros(num_features, DType::F32, device)?;
        Self::new(
            num_features,
            running_mean,
            running_var,
            Some(scale),
            Some(shift),
        )
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn running_mean(&self) -> &Tensor {
        &self.running_mean
    }

    pub fn running_var(&self) -> &Tensor {
        &self.running_var
    }

    pub fn scale(&self) -> Option<&Tensor> {
        self.scale.as_ref()
    }

    pub fn shift(&self) -> Option<&Tensor> {
        self.shift.as_ref()
    }

    pub fn affine(&self) -> bool {
        self.scale.is_some()
    }

    /// Returns a bundle grown to `new_width` by appending the entries at the
    /// drawn `indices` (a 1-D `u32` tensor) to each parameter array.
    pub(crate) fn extend_with(&self, indices: &Tensor, new_width: usize) -> Result<Self> {
        let grow = |param: &Tensor| -> Result<Tensor> {
            let appended = param.index_select(indices, 0)?;
            Ok(Tensor::cat(&[param, &appended], 0)?)
        };
        let running_mean = grow(&self.running_mean)?;
        let running_var = grow(&self.running_var)?;
        let scale = match &self.scale {
            Some(scale) => Some(grow(scale)?),
            None => None,
        };
        let shift = match &self.shift {
            Some(shift) => Some(grow(shift)?),
            None => None,
        };
        Self::new(new_width, running_mean, running_var, scale, shift)
    }

    /// Eval-mode transform, broadcasting the per-feature arrays over axis 1
    /// of the input (`(batch, features, ...)`).
    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let rank = input.dims().len();
        if rank < 2 || input.dims()[1] != self.num_features {
            return Err(MorphError::shape(format!(
                "batch_norm.input: expected {} features on axis 1, got {:?}",
                self.num_features,
                input.dims()
            )));
        }
        let mut shape = vec![1usize; rank];
        shape[1] = self.num_features;
        let mean = self.running_mean.reshape(shape.clone())?;
        let var = self.running_var.reshape(shape.clone())?;
        let denom = (var + self.eps)?.sqrt()?;
        let mut out = input.broadcast_sub(&mean)?.broadcast_div(&denom)?;
        if let Some(scale) = &self.scale {
            out = out.broadcast_mul(&scale.reshape(shape.clone())?)?;
        }
        if let Some(shift) = &self.shift {
            out = out.broadcast_add(&shift.reshape(shape)?)?;
        }
        Ok(out)
    }
}
