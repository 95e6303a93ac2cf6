//! Fake-quantization kernels
//!
//! Each kernel runs quantize → dequantize in float and pairs the result with
//! its straight-through-estimator gradient rule ahead of time, so a host
//! autodiff engine can register both sides of the op at once:
//! - [`minmax`]: float-scale kernels driven by a calibrated `[f_min, f_max]`
//! - [`position`]: power-of-two kernels driven by a quantize position
//! - [`log_th`]: power-of-two kernel driven by a learned log threshold
//!
//! Kernels exist only for the supported combinations of rounding, symmetry
//! and granularity; anything else is a configuration error, never a silent
//! fallback onto a different kernel.

use ndarray::{ArrayD, Axis};

use crate::config::QuantConfig;
use crate::error::{Error, Result};
use crate::round::RoundMode;

mod log_th;
mod minmax;
mod position;

pub use log_th::fake_quantize_log_th;
pub use minmax::fake_quantize_min_max;
pub use position::{fake_quantize_pos_asym, fake_quantize_pos_sym};

/// Gradient rule of one fake-quantize forward pass.
///
/// `backward` maps the output gradient onto one gradient slot per kernel
/// input, in the kernel's documented slot order; `None` marks an input that
/// receives no gradient.
pub trait QuantBackwardOp {
    fn backward(&self, dy: &ArrayD<f32>) -> Vec<Option<ArrayD<f32>>>;
}

/// A fake-quantize forward result paired with its gradient rule.
pub struct FakeQuantOp {
    output: ArrayD<f32>,
    backward_op: Box<dyn QuantBackwardOp>,
}

impl FakeQuantOp {
    pub(crate) fn new(output: ArrayD<f32>, backward_op: Box<dyn QuantBackwardOp>) -> Self {
        Self {
            output,
            backward_op,
        }
    }

    /// The dequantized forward output.
    pub fn output(&self) -> &ArrayD<f32> {
        &self.output
    }

    /// Consume the op, keeping only the forward output.
    pub fn into_output(self) -> ArrayD<f32> {
        self.output
    }

    /// Per-input gradients for the output gradient `dy`.
    ///
    /// `dy` must have the shape of the forward output.
    pub fn backward(&self, dy: &ArrayD<f32>) -> Vec<Option<ArrayD<f32>>> {
        assert_eq!(
            dy.shape(),
            self.output.shape(),
            "output gradient shape {:?} does not match forward output shape {:?}",
            dy.shape(),
            self.output.shape()
        );
        self.backward_op.backward(dy)
    }
}

impl std::fmt::Debug for FakeQuantOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeQuantOp")
            .field("output", &self.output)
            .finish()
    }
}

/// Straight-through rule: `dy` flows to the first slot unchanged, all other
/// slots get no gradient.
pub(crate) struct PassThroughBackward {
    pub slots: usize,
}

impl QuantBackwardOp for PassThroughBackward {
    fn backward(&self, dy: &ArrayD<f32>) -> Vec<Option<ArrayD<f32>>> {
        let mut grads: Vec<Option<ArrayD<f32>>> = vec![None; self.slots];
        grads[0] = Some(dy.clone());
        grads
    }
}

/// The three kernel families.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KernelFamily {
    MinMax,
    Position,
    LogThreshold,
}

/// Reject configurations no kernel implements.
///
/// Supported matrix:
/// - MinMax: half-to-even, sym/asym, per-tensor/per-channel
/// - Position: half-to-even sym/asym per-tensor/per-channel;
///   half-up sym/asym per-tensor only
/// - LogThreshold: half-to-even or half-up, symmetric, per-tensor only
pub fn check_kernel_support(family: KernelFamily, cfg: &QuantConfig) -> Result<()> {
    cfg.validate()?;

    match family {
        KernelFamily::MinMax => {
            if cfg.round_mode != RoundMode::HalfToEven {
                return Err(Error::UnsupportedKernel(format!(
                    "min-max kernels require half-to-even rounding, got {:?}",
                    cfg.round_mode
                )));
            }
        }
        KernelFamily::Position => match cfg.round_mode {
            RoundMode::HalfToEven => {}
            RoundMode::HalfUp => {
                if cfg.per_channel {
                    return Err(Error::UnsupportedKernel(
                        "half-up position kernels are per-tensor only".to_string(),
                    ));
                }
            }
            RoundMode::HalfAwayFromZero => {
                return Err(Error::UnsupportedKernel(
                    "position kernels do not support half-away-from-zero rounding".to_string(),
                ));
            }
        },
        KernelFamily::LogThreshold => {
            if !cfg.symmetry {
                return Err(Error::UnsupportedKernel(
                    "log-threshold kernels are symmetric only".to_string(),
                ));
            }
            if cfg.per_channel {
                return Err(Error::UnsupportedKernel(
                    "log-threshold kernels are per-tensor only".to_string(),
                ));
            }
            if cfg.round_mode == RoundMode::HalfAwayFromZero {
                return Err(Error::UnsupportedKernel(
                    "log-threshold kernels do not support half-away-from-zero rounding"
                        .to_string(),
                ));
            }
        }
    }
    Ok(())
}

/// Symmetric quantize: `Q(x) = clip(round(x * scale), q_min, q_max)`.
pub(crate) fn quantize_sym(x: f32, scale: f32, q_min: f32, q_max: f32, round: RoundMode) -> f32 {
    round.round(x * scale).clamp(q_min, q_max)
}

/// Asymmetric quantize: `Q(x) = clip(q_min + round((x - shift) * scale))`.
pub(crate) fn quantize_asym(
    x: f32,
    scale: f32,
    shift: f32,
    q_min: f32,
    q_max: f32,
    round: RoundMode,
) -> f32 {
    (q_min + round.round((x - shift) * scale)).clamp(q_min, q_max)
}

/// Symmetric dequantize: `DQ(q) = q / scale`.
pub(crate) fn dequantize_sym(q: f32, scale: f32) -> f32 {
    q / scale
}

/// Asymmetric dequantize: `DQ(q) = (q - q_min) / scale + shift`.
pub(crate) fn dequantize_asym(q: f32, scale: f32, shift: f32, q_min: f32) -> f32 {
    (q - q_min) / scale + shift
}

/// Symmetric quantize → dequantize in one step.
pub(crate) fn fake_quantize_sym_value(
    x: f32,
    scale: f32,
    q_min: f32,
    q_max: f32,
    round: RoundMode,
) -> f32 {
    dequantize_sym(quantize_sym(x, scale, q_min, q_max, round), scale)
}

/// Apply a per-channel scalar kernel along `axis`.
pub(crate) fn map_channels<F>(input: &ArrayD<f32>, axis: usize, f: F) -> ArrayD<f32>
where
    F: Fn(usize, f32) -> f32,
{
    let mut out = ArrayD::zeros(input.raw_dim());
    for c in 0..input.len_of(Axis(axis)) {
        let src = input.index_axis(Axis(axis), c);
        let mut dst = out.index_axis_mut(Axis(axis), c);
        dst.assign(&src.mapv(|x| f(c, x)));
    }
    out
}
