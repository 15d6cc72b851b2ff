//! Width expansion ("Net2Wider").
//!
//! Grows a producer layer's output dimension to `new_width` and the consuming
//! layer's input dimension to match, preserving the composed function: the
//! appended producer units are copies of randomly drawn existing units, and
//! every copy's contribution into the consumer is rescaled by one over its
//! replication factor so the sum over copies equals the original unit's
//! contribution.
//!
//! Inputs are never mutated. A successful call returns a fresh [`Widened`]
//! value the caller commits through its model container (see
//! [`crate::host::LayerHost`]); a failed precondition leaves everything
//! untouched.

use candle_core::Tensor;
use rand::Rng;

use crate::core::errors::{MorphError, Result};
use crate::core::WidenOptions;
use crate::host::LayerHost;
use crate::layers::{
    BatchNorm, Conv2d, Conv2dConfig, Conv3d, Conv3dConfig, Layer, Linear, LinearConfig,
};
use crate::noise;

/// Bookkeeping for one widening call: which existing units were drawn for
/// duplication, and how often each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationMap {
    counts: Vec<usize>,
    draws: Vec<usize>,
}

impl ReplicationMap {
    fn draw(old_width: usize, new_width: usize, rng: &mut impl Rng) -> Self {
        let draws: Vec<usize> = (0..new_width - old_width)
            .map(|_| rng.gen_range(0..old_width))
            .collect();
        let mut counts = vec![0usize; old_width];
        for &index in &draws {
            counts[index] += 1;
        }
        Self { counts, draws }
    }

    /// The drawn indices, in draw order.
    pub fn draws(&self) -> &[usize] {
        &self.draws
    }

    /// How many times the original unit at `index` was duplicated.
    pub fn count(&self, index: usize) -> usize {
        self.counts[index]
    }

    /// Original width of the producer.
    pub fn old_width(&self) -> usize {
        self.counts.len()
    }

    /// Width after expansion; always `old_width + draws.len()`, which equals
    /// the sum of `1 + count` over all original units.
    pub fn new_width(&self) -> usize {
        self.counts.len() + self.draws.len()
    }
}

/// Fresh layer state produced by a widening call.
#[derive(Debug, Clone)]
pub struct Widened {
    pub producer: Layer,
    pub consumer: Layer,
    pub batch_norm: Option<BatchNorm>,
    pub replication: ReplicationMap,
}

impl Widened {
    /// Commits the new state onto a model container in one pass.
    ///
    /// `batch_norm_name` must be given exactly when the widening carried a
    /// normalisation bundle. Every target is resolved before the first
    /// replacement, so a bad name leaves the model untouched.
    pub fn commit(
        self,
        host: &mut dyn LayerHost,
        producer_name: &str,
        consumer_name: &str,
        batch_norm_name: Option<&str>,
    ) -> Result<()> {
        for name in [producer_name, consumer_name] {
            if host.layer(name).is_none() {
                return Err(MorphError::UnknownLayer(name.to_string()));
            }
        }
        match (&self.batch_norm, batch_norm_name) {
            (Some(_), None) => {
                return Err(MorphError::shape(
                    "widened batch norm bundle has no target name",
                ))
            }
            (_, Some(name)) if host.batch_norm(name).is_none() => {
                return Err(MorphError::UnknownLayer(name.to_string()));
            }
            (None, Some(name)) => {
                return Err(MorphError::shape(format!(
                    "widening produced no batch norm bundle for target {name}"
                )))
            }
            _ => {}
        }

        host.replace_layer(producer_name, self.producer)?;
        host.replace_layer(consumer_name, self.consumer)?;
        if let (Some(bundle), Some(name)) = (self.batch_norm, batch_norm_name) {
            host.replace_batch_norm(name, bundle)?;
        }
        Ok(())
    }
}

/// Widens `producer` to `new_width` output units and adjusts `consumer` to
/// accept them.
///
/// Supported pairings: `Conv2d -> Conv2d`, `Conv3d -> Conv3d`,
/// `Linear -> Linear`, and `Conv2d -> Linear` (the consumer is treated as
/// consuming the flattened convolution output). `batch_norm`, when given,
/// must be the bundle tracking the producer's output and is grown with the
/// same drawn indices.
pub fn widen(
    producer: &Layer,
    consumer: &Layer,
    new_width: usize,
    batch_norm: Option<&BatchNorm>,
    opts: &WidenOptions,
    rng: &mut impl Rng,
) -> Result<Widened> {
    let widened = match (producer, consumer) {
        (Layer::Conv2d(p), Layer::Conv2d(c)) => {
            check_adjacency(p.config().out_channels, c.config().in_channels)?;
            let parts = widen_tensors(
                p.weight(),
                p.bias(),
                c.weight(),
                batch_norm,
                new_width,
                opts,
                rng,
            )?;
            let producer = Conv2d::new(
                Conv2dConfig {
                    out_channels: new_width,
                    ..*p.config()
                },
                parts.w1,
                parts.b1,
            )?;
            let consumer = Conv2d::new(
                Conv2dConfig {
                    in_channels: new_width,
                    ..*c.config()
                },
                parts.w2,
                c.bias().clone(),
            )?;
            Widened {
                producer: Layer::Conv2d(producer),
                consumer: Layer::Conv2d(consumer),
                batch_norm: parts.batch_norm,
                replication: parts.replication,
            }
        }
        (Layer::Conv3d(p), Layer::Conv3d(c)) => {
            check_adjacency(p.config().out_channels, c.config().in_channels)?;
            let parts = widen_tensors(
                p.weight(),
                p.bias(),
                c.weight(),
                batch_norm,
                new_width,
                opts,
                rng,
            )?;
            let producer = Conv3d::new(
                Conv3dConfig {
                    out_channels: new_width,
                    ..*p.config()
                },
                parts.w1,
                parts.b1,
            )?;
            let consumer = Conv3d::new(
                Conv3dConfig {
                    in_channels: new_width,
                    ..*c.config()
                },
                parts.w2,
                c.bias().clone(),
            )?;
            Widened {
                producer: Layer::Conv3d(producer),
                consumer: Layer::Conv3d(consumer),
                batch_norm: parts.batch_norm,
                replication: parts.replication,
            }
        }
        (Layer::Linear(p), Layer::Linear(c)) => {
            check_adjacency(p.config().out_features, c.config().in_features)?;
            let parts = widen_tensors(
                p.weight(),
                p.bias(),
                c.weight(),
                batch_norm,
                new_width,
                opts,
                rng,
            )?;
            let producer = Linear::new(
                LinearConfig {
                    out_features: new_width,
                    ..*p.config()
                },
                parts.w1,
                parts.b1,
            )?;
            let consumer = Linear::new(
                LinearConfig {
                    in_features: new_width,
                    ..*c.config()
                },
                parts.w2,
                c.bias().clone(),
            )?;
            Widened {
                producer: Layer::Linear(producer),
                consumer: Layer::Linear(consumer),
                batch_norm: parts.batch_norm,
                replication: parts.replication,
            }
        }
        (Layer::Conv2d(p), Layer::Linear(c)) => widen_conv_into_linear(
            p, c, new_width, batch_norm, opts, rng,
        )?,
        _ => {
            return Err(MorphError::unsupported(
                "widen",
                format!("{} -> {}", producer.kind(), consumer.kind()),
            ))
        }
    };

    log::debug!(
        "net2wider {} -> {}: width {} -> {}, draws {:?}",
        producer.kind(),
        consumer.kind(),
        widened.replication.old_width(),
        widened.replication.new_width(),
        widened.replication.draws(),
    );
    Ok(widened)
}

/// A convolution feeding a fully-connected layer over its flattened output.
///
/// The consumer weight `(out_features, in_features)` is viewed as
/// `(out_features, out_channels, spatial)` so the channel-duplication
/// arithmetic applies unchanged, then flattened back with the widened
/// channel count.
fn widen_conv_into_linear(
    p: &Conv2d,
    c: &Linear,
    new_width: usize,
    batch_norm: Option<&BatchNorm>,
    opts: &WidenOptions,
    rng: &mut impl Rng,
) -> Result<Widened> {
    let out_channels = p.config().out_channels;
    let in_features = c.config().in_features;
    let out_features = c.config().out_features;
    if in_features % out_channels != 0 {
        return Err(MorphError::shape(format!(
            "linear input features {in_features} are not a multiple of \
             producer channels {out_channels}"
        )));
    }
    let spatial = in_features / out_channels;

    let w2_view = c.weight().reshape((out_features, out_channels, spatial))?;
    let parts = widen_tensors(p.weight(), p.bias(), &w2_view, batch_norm, new_width, opts, rng)?;
    let w2_flat = parts.w2.reshape((out_features, new_width * spatial))?;

    let producer = Conv2d::new(
        Conv2dConfig {
            out_channels: new_width,
            ..*p.config()
        },
        parts.w1,
        parts.b1,
    )?;
    let consumer = Linear::new(
        LinearConfig {
            in_features: new_width * spatial,
            out_features,
        },
        w2_flat,
        c.bias().clone(),
    )?;
    Ok(Widened {
        producer: Layer::Conv2d(producer),
        consumer: Layer::Linear(consumer),
        batch_norm: parts.batch_norm,
        replication: parts.replication,
    })
}

struct WidenedTensors {
    w1: Tensor,
    b1: Tensor,
    w2: Tensor,
    batch_norm: Option<BatchNorm>,
    replication: ReplicationMap,
}

/// Core duplication pass, shared by every supported pairing.
///
/// `w1` has its output units on axis 0, `w2` its input units on axis 1; the
/// remaining axes are carried along untouched, which is what makes the same
/// code serve 2-D kernels, 3-D kernels, and dense matrices.
fn widen_tensors(
    w1: &Tensor,
    b1: &Tensor,
    w2: &Tensor,
    batch_norm: Option<&BatchNorm>,
    new_width: usize,
    opts: &WidenOptions,
    rng: &mut impl Rng,
) -> Result<WidenedTensors> {
    let old_width = w1.dim(0)?;
    if old_width == 0 {
        return Err(MorphError::shape("producer has no output units"));
    }
    if new_width <= old_width {
        return Err(MorphError::InvalidWidth {
            requested: new_width,
            current: old_width,
        });
    }
    if let Some(bundle) = batch_norm {
        if bundle.num_features() != old_width {
            return Err(MorphError::shape(format!(
                "batch norm tracks {} features but producer has {old_width} output units",
                bundle.num_features()
            )));
        }
    }

    let replication = ReplicationMap::draw(old_width, new_width, rng);
    let ids = index_tensor(replication.draws(), w1)?;

    // Producer: append one copy per draw. The first appended unit stays an
    // exact copy; later ones get range-bounded noise so duplicates do not
    // receive identical gradients.
    let mut nw1 = w1.clone();
    for (i, &index) in replication.draws().iter().enumerate() {
        let mut unit = w1.narrow(0, index, 1)?;
        if opts.noise && i > 0 {
            unit = noise::perturb_like(&unit, &nw1, rng)?;
        }
        nw1 = Tensor::cat(&[&nw1, &unit], 0)?;
    }
    let nb1 = Tensor::cat(&[b1, &b1.index_select(&ids, 0)?], 0)?;

    // Consumer: append the drawn input slices, then rescale the original
    // slice and every copy of a duplicated unit by 1/(1 + replications) so
    // their summed contribution matches the original single unit.
    let extended = Tensor::cat(&[w2, &w2.index_select(&ids, 1)?], 1)?;
    let mut scale = vec![1f32; new_width];
    for (i, &index) in replication.draws().iter().enumerate() {
        let factor = (replication.count(index) + 1) as f32;
        scale[index] = 1.0 / factor;
        scale[old_width + i] = 1.0 / factor;
    }
    let mut scale_shape = vec![1usize; extended.dims().len()];
    scale_shape[1] = new_width;
    let scale = Tensor::from_vec(scale, scale_shape, extended.device())?;
    let nw2 = extended.broadcast_mul(&scale)?;

    let batch_norm = match batch_norm {
        Some(bundle) => Some(bundle.extend_with(&ids, new_width)?),
        None => None,
    };

    Ok(WidenedTensors {
        w1: nw1,
        b1: nb1,
        w2: nw2,
        batch_norm,
        replication,
    })
}

fn check_adjacency(producer_out: usize, consumer_in: usize) -> Result<()> {
    if producer_out == consumer_in {
        Ok(())
    } else {
        Err(MorphError::shape(format!(
            "producer emits {producer_out} units but consumer expects {consumer_in}"
        )))
    }
}

fn index_tensor(draws: &[usize], like: &Tensor) -> Result<Tensor> {
    let ids: Vec<u32> = draws.iter().map(|&i| i as u32).collect();
    let len = ids.len();
    Ok(Tensor::from_vec(ids, len, like.device())?)
}
