//! Brute-force equivalence verification.
//!
//! Replays a producer/consumer pair for both the teacher and the morphed
//! student through an explicit two-dimensional "same"-mode convolution (true
//! convolution, kernel flipped) on a random input, and compares the composed
//! outputs. The loops are deliberately naive: they share no code with the
//! layer forward paths, so a bookkeeping bug in the surgery cannot hide
//! behind the same kernel implementation that produced it. Accumulation is
//! `f64` end to end.
//!
//! Both weight layouts are handled by one implementation parameterised by
//! [`WeightLayout`]; nothing here assumes channel-first is canonical.

use candle_core::Tensor;
use rand::Rng;

use crate::core::errors::{MorphError, Result};
use crate::core::{WeightLayout, ERROR_TOLERANCE};

/// How many multiples of the kernel extent the random probe input spans.
const PROBE_SCALE: usize = 4;

/// Columns in the random probe matrix for the dense check.
const PROBE_COLUMNS: usize = 16;

/// Producer weight, producer bias, and consumer weight of one network.
#[derive(Debug, Clone)]
pub struct LayerPairWeights {
    pub w1: Tensor,
    pub b1: Tensor,
    pub w2: Tensor,
}

impl LayerPairWeights {
    pub fn new(w1: Tensor, b1: Tensor, w2: Tensor) -> Self {
        Self { w1, b1, w2 }
    }
}

/// Numeric equivalence checker for teacher/student layer pairs.
#[derive(Debug, Clone, Copy)]
pub struct Verifier {
    /// Maximum tolerated magnitude of the signed output difference sum.
    pub tolerance: f64,
}

impl Default for Verifier {
    fn default() -> Self {
        Self {
            tolerance: ERROR_TOLERANCE,
        }
    }
}

impl Verifier {
    /// Checks a convolution producer/consumer pair.
    ///
    /// Draws one random input sized [`PROBE_SCALE`] times the kernel extent
    /// per spatial axis, composes producer (+bias) and consumer for both
    /// networks, and fails with [`MorphError::VerificationFailure`] when the
    /// absolute sum of output differences exceeds the tolerance.
    pub fn check_conv(
        &self,
        teacher: &LayerPairWeights,
        student: &LayerPairWeights,
        layout: WeightLayout,
        rng: &mut impl Rng,
    ) -> Result<()> {
        let teacher_w1 = CanonicalConv::load(&teacher.w1, layout)?;
        let teacher_w2 = CanonicalConv::load(&teacher.w2, layout)?;
        let student_w1 = CanonicalConv::load(&student.w1, layout)?;
        let student_w2 = CanonicalConv::load(&student.w2, layout)?;
        let teacher_b1 = host_vector(&teacher.b1)?;
        let student_b1 = host_vector(&student.b1)?;

        if teacher_w1.out_channels != teacher_b1.len()
            || student_w1.out_channels != student_b1.len()
        {
            return Err(MorphError::shape(
                "producer bias length must match producer output channels",
            ));
        }
        if teacher_w1.out_channels != teacher_w2.in_channels
            || student_w1.out_channels != student_w2.in_channels
        {
            return Err(MorphError::shape(
                "producer output channels must match consumer input channels",
            ));
        }
        if teacher_w1.in_channels != student_w1.in_channels {
            return Err(MorphError::shape(
                "teacher and student must consume the same input channels",
            ));
        }
        if teacher_w2.out_channels != student_w2.out_channels {
            return Err(MorphError::shape(
                "teacher and student must produce the same output channels",
            ));
        }
        if teacher_w1.kernel_h != student_w1.kernel_h
            || teacher_w1.kernel_w != student_w1.kernel_w
        {
            return Err(MorphError::shape(
                "teacher and student producer kernels must agree in extent",
            ));
        }

        let height = teacher_w1.kernel_h * PROBE_SCALE;
        let width = teacher_w1.kernel_w * PROBE_SCALE;
        let input: Vec<f64> = (0..teacher_w1.in_channels * height * width)
            .map(|_| rng.gen::<f64>())
            .collect();

        let teacher_out =
            compose_conv(&teacher_w1, &teacher_b1, &teacher_w2, &input, height, width);
        let student_out =
            compose_conv(&student_w1, &student_b1, &student_w2, &input, height, width);

        self.compare(&teacher_out, &student_out)
    }

    /// Dense counterpart of [`Verifier::check_conv`] for fully-connected
    /// pairs: composes `w2 * (w1 * x + b1)` on a random probe matrix.
    pub fn check_linear(
        &self,
        teacher: &LayerPairWeights,
        student: &LayerPairWeights,
        rng: &mut impl Rng,
    ) -> Result<()> {
        let teacher_w1 = CanonicalMatrix::load(&teacher.w1)?;
        let teacher_w2 = CanonicalMatrix::load(&teacher.w2)?;
        let student_w1 = CanonicalMatrix::load(&student.w1)?;
        let student_w2 = CanonicalMatrix::load(&student.w2)?;
        let teacher_b1 = host_vector(&teacher.b1)?;
        let student_b1 = host_vector(&student.b1)?;

        if teacher_w1.rows != teacher_b1.len() || student_w1.rows != student_b1.len() {
            return Err(MorphError::shape(
                "producer bias length must match producer output features",
            ));
        }
        if teacher_w1.rows != teacher_w2.cols || student_w1.rows != student_w2.cols {
            return Err(MorphError::shape(
                "producer output features must match consumer input features",
            ));
        }
        if teacher_w1.cols != student_w1.cols {
            return Err(MorphError::shape(
                "teacher and student must consume the same input features",
            ));
        }
        if teacher_w2.rows != student_w2.rows {
            return Err(MorphError::shape(
                "teacher and student must produce the same output features",
            ));
        }

        let input: Vec<f64> = (0..teacher_w1.cols * PROBE_COLUMNS)
            .map(|_| rng.gen::<f64>())
            .collect();

        let teacher_out = compose_dense(&teacher_w1, &teacher_b1, &teacher_w2, &input);
        let student_out = compose_dense(&student_w1, &student_b1, &student_w2, &input);

        self.compare(&teacher_out, &student_out)
    }

    fn compare(&self, teacher_out: &[f64], student_out: &[f64]) -> Result<()> {
        let error: f64 = teacher_out
            .iter()
            .zip(student_out.iter())
            .map(|(t, s)| t - s)
            .sum::<f64>()
            .abs();
        log::debug!("equivalence check: |sum diff| = {error:e}");
        if error < self.tolerance {
            Ok(())
        } else {
            Err(MorphError::VerificationFailure { error })
        }
    }
}

/// A convolution weight pulled to the host in `(out, in, kh, kw)` order.
#[derive(Debug)]
struct CanonicalConv {
    out_channels: usize,
    in_channels: usize,
    kernel_h: usize,
    kernel_w: usize,
    data: Vec<f64>,
}

impl CanonicalConv {
    fn load(weight: &Tensor, layout: WeightLayout) -> Result<Self> {
        if weight.dims().len() != 4 {
            return Err(MorphError::unsupported(
                "verification",
                format!("rank-{} convolution weights", weight.dims().len()),
            ));
        }
        let (weight, (out_channels, in_channels, kernel_h, kernel_w)) = match layout {
            WeightLayout::ChannelsFirst => (weight.clone(), weight.dims4()?),
            WeightLayout::ChannelsLast => {
                let (kh, kw, ic, oc) = weight.dims4()?;
                (weight.permute((3, 2, 0, 1))?.contiguous()?, (oc, ic, kh, kw))
            }
        };
        let data = weight
            .flatten_all()?
            .to_vec1::<f32>()?
            .into_iter()
            .map(f64::from)
            .collect();
        Ok(Self {
            out_channels,
            in_channels,
            kernel_h,
            kernel_w,
            data,
        })
    }

    fn kernel(&self, out_channel: usize, in_channel: usize) -> &[f64] {
        let size = self.kernel_h * self.kernel_w;
        let offset = (out_channel * self.in_channels + in_channel) * size;
        &self.data[offset..offset + size]
    }
}

/// A dense weight pulled to the host in `(rows, cols)` order.
struct CanonicalMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl CanonicalMatrix {
    fn load(weight: &Tensor) -> Result<Self> {
        let (rows, cols) = weight.dims2().map_err(|_| {
            MorphError::shape(format!(
                "dense verification expects rank-2 weights, got {:?}",
                weight.dims()
            ))
        })?;
        let data = weight
            .flatten_all()?
            .to_vec1::<f32>()?
            .into_iter()
            .map(f64::from)
            .collect();
        Ok(Self { rows, cols, data })
    }

    fn at(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col]
    }
}

/// Runs `input` through producer (+bias) then consumer, channel by channel.
fn compose_conv(
    w1: &CanonicalConv,
    b1: &[f64],
    w2: &CanonicalConv,
    input: &[f64],
    height: usize,
    width: usize,
) -> Vec<f64> {
    let plane = height * width;
    let mut hidden = vec![0f64; w1.out_channels * plane];
    for o in 0..w1.out_channels {
        let out_plane = &mut hidden[o * plane..(o + 1) * plane];
        for i in 0..w1.in_channels {
            convolve_same_into(
                &input[i * plane..(i + 1) * plane],
                height,
                width,
                w1.kernel(o, i),
                w1.kernel_h,
                w1.kernel_w,
                out_plane,
            );
        }
        for value in out_plane.iter_mut() {
            *value += b1[o];
        }
    }

    let mut output = vec![0f64; w2.out_channels * plane];
    for o in 0..w2.out_channels {
        let out_plane = &mut output[o * plane..(o + 1) * plane];
        for i in 0..w2.in_channels {
            convolve_same_into(
                &hidden[i * plane..(i + 1) * plane],
                height,
                width,
                w2.kernel(o, i),
                w2.kernel_h,
                w2.kernel_w,
                out_plane,
            );
        }
    }
    output
}

/// Accumulates `input (*) kernel` into `out`, "same" mode, kernel flipped.
fn convolve_same_into(
    input: &[f64],
    height: usize,
    width: usize,
    kernel: &[f64],
    kernel_h: usize,
    kernel_w: usize,
    out: &mut [f64],
) {
    let anchor_h = (kernel_h / 2) as isize;
    let anchor_w = (kernel_w / 2) as isize;
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0f64;
            for ky in 0..kernel_h {
                let sy = y as isize + anchor_h - ky as isize;
                if sy < 0 || sy >= height as isize {
                    continue;
                }
                for kx in 0..kernel_w {
                    let sx = x as isize + anchor_w - kx as isize;
                    if sx < 0 || sx >= width as isize {
                        continue;
                    }
                    acc += input[sy as usize * width + sx as usize]
                        * kernel[ky * kernel_w + kx];
                }
            }
            out[y * width + x] += acc;
        }
    }
}

fn compose_dense(
    w1: &CanonicalMatrix,
    b1: &[f64],
    w2: &CanonicalMatrix,
    input: &[f64],
) -> Vec<f64> {
    let cols = input.len() / w1.cols;
    let mut hidden = vec![0f64; w1.rows * cols];
    for r in 0..w1.rows {
        for c in 0..cols {
            let mut acc = b1[r];
            for k in 0..w1.cols {
                acc += w1.at(r, k) * input[k * cols + c];
            }
            hidden[r * cols + c] = acc;
        }
    }
    let mut output = vec![0f64; w2.rows * cols];
    for r in 0..w2.rows {
        for c in 0..cols {
            let mut acc = 0f64;
            for k in 0..w2.cols {
                acc += w2.at(r, k) * hidden[k * cols + c];
            }
            output[r * cols + c] = acc;
        }
    }
    output
}

fn host_vector(tensor: &Tensor) -> Result<Vec<f64>> {
    if tensor.dims().len() != 1 {
        return Err(MorphError::shape(format!(
            "bias must be rank 1, got {:?}",
            tensor.dims()
        )));
    }
    Ok(tensor
        .to_vec1::<f32>()?
        .into_iter()
        .map(f64::from)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn random_pair(
        in_ch: usize,
        mid_ch: usize,
        out_ch: usize,
        kernel: usize,
        device: &Device,
        rng: &mut StdRng,
    ) -> Result<LayerPairWeights> {
        let sample = |n: usize, rng: &mut StdRng| -> Vec<f32> {
            (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect()
        };
        let w1 = Tensor::from_vec(
            sample(mid_ch * in_ch * kernel * kernel, rng),
            (mid_ch, in_ch, kernel, kernel),
            device,
        )?;
        let b1 = Tensor::from_vec(sample(mid_ch, rng), mid_ch, device)?;
        let w2 = Tensor::from_vec(
            sample(out_ch * mid_ch * kernel * kernel, rng),
            (out_ch, mid_ch, kernel, kernel),
            device,
        )?;
        Ok(LayerPairWeights::new(w1, b1, w2))
    }

    #[test]
    fn identical_networks_verify_cleanly() -> Result<()> {
        let device = Device::Cpu;
        let mut rng = StdRng::seed_from_u64(21);
        let pair = random_pair(3, 4, 2, 3, &device, &mut rng)?;
        let verifier = Verifier::default();
        verifier.check_conv(
            &pair,
            &pair.clone(),
            WeightLayout::ChannelsFirst,
            &mut rng,
        )
    }

    #[test]
    fn corrupted_student_fails_with_measured_error() -> Result<()> {
        let device = Device::Cpu;
        let mut rng = StdRng::seed_from_u64(22);
        // Strictly positive weights and inputs keep every intermediate
        // positive, so doubling the consumer cannot cancel in the signed sum.
        let positive = |n: usize, rng: &mut StdRng| -> Vec<f32> {
            (0..n).map(|_| rng.gen_range(0.1..1.0)).collect()
        };
        let w1 = Tensor::from_vec(positive(4 * 3 * 3 * 3, &mut rng), (4, 3, 3, 3), &device)?;
        let b1 = Tensor::from_vec(positive(4, &mut rng), 4, &device)?;
        let w2 = Tensor::from_vec(positive(2 * 4 * 3 * 3, &mut rng), (2, 4, 3, 3), &device)?;
        let teacher = LayerPairWeights::new(w1, b1, w2);
        let student = LayerPairWeights::new(
            teacher.w1.clone(),
            teacher.b1.clone(),
            (&teacher.w2 * 2.0)?,
        );
        let err = Verifier::default()
            .check_conv(&teacher, &student, WeightLayout::ChannelsFirst, &mut rng)
            .unwrap_err();
        match err {
            MorphError::VerificationFailure { error } => assert!(error > 1.0),
            other => panic!("expected VerificationFailure, got {other}"),
        }
        Ok(())
    }

    #[test]
    fn channel_last_layout_matches_channel_first() -> Result<()> {
        let device = Device::Cpu;
        let mut rng = StdRng::seed_from_u64(23);
        let pair = random_pair(2, 3, 2, 3, &device, &mut rng)?;
        // The same weights expressed channel-last must verify against
        // themselves just like the channel-first originals do.
        let to_last = |w: &Tensor| -> Result<Tensor> {
            Ok(w.permute((2, 3, 1, 0))?.contiguous()?)
        };
        let last = LayerPairWeights::new(
            to_last(&pair.w1)?,
            pair.b1.clone(),
            to_last(&pair.w2)?,
        );
        Verifier::default().check_conv(
            &last,
            &last.clone(),
            WeightLayout::ChannelsLast,
            &mut rng,
        )
    }

    #[test]
    fn dense_pair_verifies_and_detects_corruption() -> Result<()> {
        let device = Device::Cpu;
        let mut rng = StdRng::seed_from_u64(24);
        let w1 = Tensor::from_vec(
            (0..12).map(|i| i as f32 * 0.1 - 0.5).collect::<Vec<f32>>(),
            (3, 4),
            &device,
        )?;
        let b1 = Tensor::from_vec(vec![0.1f32, -0.2, 0.3], 3, &device)?;
        let w2 = Tensor::from_vec(
            (0..6).map(|i| i as f32 * 0.2).collect::<Vec<f32>>(),
            (2, 3),
            &device,
        )?;
        let teacher = LayerPairWeights::new(w1, b1, w2);
        Verifier::default().check_linear(&teacher, &teacher.clone(), &mut rng)?;

        let student = LayerPairWeights::new(
            teacher.w1.clone(),
            teacher.b1.clone(),
            Tensor::ones((2, 3), DType::F32, &device)?,
        );
        let err = Verifier::default()
            .check_linear(&teacher, &student, &mut rng)
            .unwrap_err();
        assert!(matches!(err, MorphError::VerificationFailure { .. }));
        Ok(())
    }

    #[test]
    fn conv3d_weights_are_rejected() {
        let device = Device::Cpu;
        let w = Tensor::zeros((2, 2, 3, 3, 3), DType::F32, &device).unwrap();
        let err = CanonicalConv::load(&w, WeightLayout::ChannelsFirst).unwrap_err();
        assert!(matches!(err, MorphError::UnsupportedLayerKind { .. }));
    }
}
