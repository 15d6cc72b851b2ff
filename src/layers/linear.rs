//! Fully-connected layer descriptor.
//!
//! Weights are `(out_features, in_features)`; inputs may be `(batch,
//! in_features)` or a flat `(in_features,)` vector.

use candle_core::Tensor;

use crate::core::errors::{MorphError, Result};
use crate::layers::checks;

/// Static configuration of a fully-connected layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearConfig {
    pub in_features: usize,
    pub out_features: usize,
}

impl LinearConfig {
    pub fn new(in_features: usize, out_features: usize) -> Self {
        Self {
            in_features,
            out_features,
        }
    }
}

/// A fully-connected layer: configuration plus owned weight and bias tensors.
#[derive(Debug, Clone)]
pub struct Linear {
    config: LinearConfig,
    weight: Tensor,
    bias: Tensor,
}

impl Linear {
    /// Constructs a descriptor from pre-existing parameters.
    pub fn new(config: LinearConfig, weight: Tensor, bias: Tensor) -> Result<Self> {
        checks::expect_dims(
            "linear.weight",
            &weight,
            &[config.out_features, config.in_features],
        )?;
        checks::expect_dims("linear.bias", &bias, &[config.out_features])?;
        checks::expect_dtype("linear.weight", &weight)?;
        checks::expect_dtype("linear.bias", &bias)?;
        checks::expect_contiguous("linear.weight", &weight)?;
        Ok(Self {
            config,
            weight,
            bias,
        })
    }

    pub fn config(&self) -> &LinearConfig {
        &self.config
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn bias(&self) -> &Tensor {
        &self.bias
    }

    /// Applies the affine projection.
    pub fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let weight_t = self.weight.t()?;
        match *input.dims() {
            [_, features] if features == self.config.in_features => {
                let out = input.matmul(&weight_t)?;
                Ok(out.broadcast_add(&self.bias)?)
            }
            [features] if features == self.config.in_features => {
                let out = input.reshape((1, features))?.matmul(&weight_t)?;
                Ok(out.reshape(self.config.out_features)?.add(&self.bias)?)
            }
            _ => Err(MorphError::shape(format!(
                "linear.input: expected trailing dimension {}, got {:?}",
                self.config.in_features,
                input.dims()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn forward_applies_weight_and_bias() -> Result<()> {
        let device = Device::Cpu;
        let config = LinearConfig::new(2, 2);
        let weight = Tensor::from_vec(vec![1f32, 0.0, 0.0, 2.0], (2, 2), &device)?;
        let bias = Tensor::from_vec(vec![1f32, -1.0], 2, &device)?;
        let layer = Linear::new(config, weight, bias)?;
        let input = Tensor::from_vec(vec![3f32, 4.0], 2, &device)?;
        let out = layer.forward(&input)?.to_vec1::<f32>()?;
        assert_eq!(out, vec![4.0, 7.0]);
        Ok(())
    }

    #[test]
    fn rejects_bias_length_mismatch() {
        let device = Device::Cpu;
        let config = LinearConfig::new(4, 3);
        let weight = Tensor::zeros((3, 4), DType::F32, &device).unwrap();
        let bias = Tensor::zeros(4, DType::F32, &device).unwrap();
        assert!(Linear::new(config, weight, bias).is_err());
    }
}
