//! Collaborator seam towards the surrounding training pipeline.
//!
//! The operators never reach into a model themselves; they return fresh
//! values and the owning pipeline commits them through [`LayerHost`]. That
//! keeps the atomicity contract honest: until a replace call succeeds, the
//! model still holds its previous tensors.
//!
//! [`SequentialHost`] is a minimal in-memory implementation for pipelines
//! that are plain layer chains, and for exercising the seam in tests.

use crate::core::errors::{MorphError, Result};
use crate::deeper::{LayerStack, StackEntry};
use crate::layers::{BatchNorm, Layer};

/// Model-container capability the morphism operators rely on.
pub trait LayerHost {
    /// Reads the named layer, if present.
    fn layer(&self, name: &str) -> Option<&Layer>;

    /// Reads the named normalisation bundle, if present.
    fn batch_norm(&self, name: &str) -> Option<&BatchNorm>;

    /// Replaces the named layer's state wholesale.
    fn replace_layer(&mut self, name: &str, layer: Layer) -> Result<()>;

    /// Replaces the named normalisation bundle wholesale.
    fn replace_batch_norm(&mut self, name: &str, bundle: BatchNorm) -> Result<()>;

    /// Substitutes the named layer with a deepened stack.
    fn splice_stack(&mut self, name: &str, stack: LayerStack) -> Result<()>;
}

#[derive(Debug, Clone)]
enum Slot {
    Layer(Layer),
    Norm(BatchNorm),
    Activation(crate::layers::Activation),
}

/// An ordered chain of named layers, normalisation bundles, and activations.
#[derive(Debug, Clone, Default)]
pub struct SequentialHost {
    slots: Vec<(String, Slot)>,
}

impl SequentialHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_layer(&mut self, name: impl Into<String>, layer: Layer) {
        self.slots.push((name.into(), Slot::Layer(layer)));
    }

    pub fn push_batch_norm(&mut self, name: impl Into<String>, bundle: BatchNorm) {
        self.slots.push((name.into(), Slot::Norm(bundle)));
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Names of the slots in chain order.
    pub fn names(&self) -> Vec<&str> {
        self.slots.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Runs an input through every slot in order, eval mode.
    pub fn forward(&self, input: &candle_core::Tensor) -> Result<candle_core::Tensor> {
        let mut current = input.clone();
        for (_, slot) in &self.slots {
            current = match slot {
                Slot::Layer(Layer::Conv2d(conv)) => conv.forward(&current)?,
                Slot::Layer(Layer::Linear(linear)) => linear.forward(&current)?,
                Slot::Layer(Layer::Conv3d(_)) => {
                    return Err(MorphError::unsupported("host forward", "Conv3d"))
                }
                Slot::Norm(bundle) => bundle.forward(&current)?,
                Slot::Activation(activation) => activation.apply(&current)?,
            };
        }
        Ok(current)
    }

    fn position(&self, name: &str) -> Result<usize> {
        self.slots
            .iter()
            .position(|(slot_name, _)| slot_name == name)
            .ok_or_else(|| MorphError::UnknownLayer(name.to_string()))
    }
}

impl LayerHost for SequentialHost {
    fn layer(&self, name: &str) -> Option<&Layer> {
        self.slots.iter().find_map(|(slot_name, slot)| {
            match (slot_name == name, slot) {
                (true, Slot::Layer(layer)) => Some(layer),
                _ => None,
            }
        })
    }

    fn batch_norm(&self, name: &str) -> Option<&BatchNorm> {
        self.slots.iter().find_map(|(slot_name, slot)| {
            match (slot_name == name, slot) {
                (true, Slot::Norm(bundle)) => Some(bundle),
                _ => None,
            }
        })
    }

    fn replace_layer(&mut self, name: &str, layer: Layer) -> Result<()> {
        let position = self.position(name)?;
        match &mut self.slots[position].1 {
            slot @ Slot::Layer(_) => {
                *slot = Slot::Layer(layer);
                Ok(())
            }
            _ => Err(MorphError::UnknownLayer(name.to_string())),
        }
    }

    fn replace_batch_norm(&mut self, name: &str, bundle: BatchNorm) -> Result<()> {
        let position = self.position(name)?;
        match &mut self.slots[position].1 {
            slot @ Slot::Norm(_) => {
                *slot = Slot::Norm(bundle);
                Ok(())
            }
            _ => Err(MorphError::UnknownLayer(name.to_string())),
        }
    }

    fn splice_stack(&mut self, name: &str, stack: LayerStack) -> Result<()> {
        let position = self.position(name)?;
        if !matches!(self.slots[position].1, Slot::Layer(_)) {
            return Err(MorphError::UnknownLayer(name.to_string()));
        }
        let mut spliced = Vec::with_capacity(stack.entries().len());
        for (i, entry) in stack.entries().iter().enumerate() {
            let slot_name = if i == 0 {
                name.to_string()
            } else {
                format!("{name}.{i}")
            };
            let slot = match entry {
                StackEntry::Layer(layer) => Slot::Layer(layer.clone()),
                StackEntry::BatchNorm(bundle) => Slot::Norm(bundle.clone()),
                StackEntry::Activation(activation) => Slot::Activation(*activation),
            };
            spliced.push((slot_name, slot));
        }
        self.slots.splice(position..=position, spliced);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{Linear, LinearConfig};
    use candle_core::{DType, Device, Tensor};

    fn linear(n: usize, device: &Device) -> Result<Layer> {
        Ok(Layer::Linear(Linear::new(
            LinearConfig::new(n, n),
            Tensor::ones((n, n), DType::F32, device)?,
            Tensor::zeros(n, DType::F32, device)?,
        )?))
    }

    #[test]
    fn replace_layer_swaps_in_place() -> Result<()> {
        let device = Device::Cpu;
        let mut host = SequentialHost::new();
        host.push_layer("fc1", linear(4, &device)?);
        let replacement = Layer::Linear(Linear::new(
            LinearConfig::new(4, 4),
            Tensor::zeros((4, 4), DType::F32, &device)?,
            Tensor::zeros(4, DType::F32, &device)?,
        )?);
        host.replace_layer("fc1", replacement)?;
        let weight = host.layer("fc1").expect("fc1 present").weight();
        let values = weight.flatten_all()?.to_vec1::<f32>()?;
        assert!(values.into_iter().all(|v| v == 0.0));
        Ok(())
    }

    #[test]
    fn unknown_names_are_rejected() -> Result<()> {
        let device = Device::Cpu;
        let mut host = SequentialHost::new();
        host.push_layer("fc1", linear(2, &device)?);
        let err = host.replace_layer("fc9", linear(2, &device)?).unwrap_err();
        assert!(matches!(err, MorphError::UnknownLayer(_)));
        Ok(())
    }
}
