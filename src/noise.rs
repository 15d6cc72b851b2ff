//! Symmetry-breaking weight perturbations.
//!
//! Duplicated units that stay bit-identical receive identical gradients and
//! never diverge under training; both morphism operators therefore offer a
//! small, bounded perturbation. Sampling goes through the caller's RNG handle
//! so seeded runs are reproducible.

use candle_core::Tensor;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::core::errors::Result;
use crate::core::NOISE_RATIO;

/// Adds uniform noise to `weights`, bounded by [`NOISE_RATIO`] times the
/// peak-to-peak range of `reference`.
///
/// Each entry receives an independent draw from
/// `[-range/2, range/2]` where `range = NOISE_RATIO * ptp(reference)`.
pub fn perturb_like(
    weights: &Tensor,
    reference: &Tensor,
    rng: &mut impl Rng,
) -> Result<Tensor> {
    let half = NOISE_RATIO * peak_to_peak(reference)? / 2.0;
    let noise: Vec<f32> = (0..weights.elem_count())
        .map(|_| rng.gen_range(-half..=half) as f32)
        .collect();
    let noise = Tensor::from_vec(noise, weights.dims().to_vec(), weights.device())?;
    Ok(weights.add(&noise)?)
}

/// Adds Gaussian noise to every entry of `weights`, with standard deviation
/// `ratio` times the tensor's own standard deviation.
pub fn gaussian_perturb(weights: &Tensor, ratio: f64, rng: &mut impl Rng) -> Result<Tensor> {
    let sigma = ratio * std_dev(weights)?;
    let noise: Vec<f32> = (0..weights.elem_count())
        .map(|_| {
            let z: f64 = rng.sample(StandardNormal);
            (z * sigma) as f32
        })
        .collect();
    let noise = Tensor::from_vec(noise, weights.dims().to_vec(), weights.device())?;
    Ok(weights.add(&noise)?)
}

/// Peak-to-peak (max minus min) range of a tensor's entries.
pub fn peak_to_peak(tensor: &Tensor) -> Result<f64> {
    let values = tensor.flatten_all()?.to_vec1::<f32>()?;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for v in values {
        let v = f64::from(v);
        min = min.min(v);
        max = max.max(v);
    }
    if min.is_finite() {
        Ok(max - min)
    } else {
        Ok(0.0)
    }
}

fn std_dev(tensor: &Tensor) -> Result<f64> {
    let values = tensor.flatten_all()?.to_vec1::<f32>()?;
    if values.is_empty() {
        return Ok(0.0);
    }
    let mean = values.iter().copied().map(f64::from).sum::<f64>() / values.len() as f64;
    let var = values
        .iter()
        .copied()
        .map(|v| {
            let diff = f64::from(v) - mean;
            diff * diff
        })
        .sum::<f64>()
        / values.len() as f64;
    Ok(var.sqrt())
}
