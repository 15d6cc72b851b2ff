use candle_core::Tensor;

use crate::core::errors::Result;

/// Stateless nonlinearities a deepened stack can interpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Relu,
    Gelu,
    Tanh,
    Sigmoid,
}

impl Activation {
    pub fn apply(&self, x: &Tensor) -> Result<Tensor> {
        let out = match self {
            Activation::Relu => x.relu()?,
            Activation::Gelu => x.gelu()?,
            Activation::Tanh => x.tanh()?,
            Activation::Sigmoid => ((x.neg()?.exp()? + 1.0)?.recip())?,
        };
        Ok(out)
    }
}
