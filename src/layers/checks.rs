//! Lightweight validation helpers shared across layer descriptors.
//!
//! These routines provide concise shape and dtype assertions wired into
//! descriptor constructors. They return the crate's [`Result`] so call sites
//! can propagate errors without panicking.

use candle_core::{DType, Tensor};

use crate::core::errors::{MorphError, Result};

/// Ensures a tensor matches the expected dimensions exactly.
pub(crate) fn expect_dims(name: &str, tensor: &Tensor, expected: &[usize]) -> Result<()> {
    let actual = tensor.dims();
    if actual == expected {
        Ok(())
    } else {
        Err(MorphError::shape(format!(
            "{name}: expected shape {expected:?}, got {actual:?}"
        )))
    }
}

/// Checks the tensor carries the crate's parameter dtype.
pub(crate) fn expect_dtype(name: &str, tensor: &Tensor) -> Result<()> {
    if tensor.dtype() == DType::F32 {
        Ok(())
    } else {
        Err(MorphError::shape(format!(
            "{name}: expected dtype F32, got {:?}",
            tensor.dtype()
        )))
    }
}

/// Rejects strided tensors; the surgery concatenates raw rows and assumes
/// contiguous storage.
pub(crate) fn expect_contiguous(name: &str, tensor: &Tensor) -> Result<()> {
    if tensor.is_contiguous() {
        Ok(())
    } else {
        Err(MorphError::shape(format!("{name}: tensor must be contiguous")))
    }
}
