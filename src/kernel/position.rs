//! Power-of-two position kernels
//!
//! The scale is `2^position`, so dequantization on the target hardware is a
//! bit shift. Positions come from the search in [`crate::search`] and are
//! stored state, not a learned parameter: the backward pass is a pure
//! straight-through estimator that hands `dy` to the input unchanged and
//! nothing to the position or range slots.
//!
//! Backward slots: `[input, position]` (symmetric) or
//! `[input, position, f_min, f_max]` (asymmetric).

use ndarray::{Array1, ArrayD, Axis};

use crate::config::QuantConfig;
use crate::error::{Error, Result};
use crate::range::normalize_channel_axis;
use crate::zero_point::quantize_zero_point;

use super::{
    check_kernel_support, dequantize_asym, dequantize_sym, map_channels, quantize_asym,
    quantize_sym, FakeQuantOp, KernelFamily, PassThroughBackward,
};

fn check_symmetry(cfg: &QuantConfig, symmetric_kernel: bool) -> Result<()> {
    if cfg.symmetry != symmetric_kernel {
        let msg = if symmetric_kernel {
            "symmetric position kernel called with an asymmetric configuration"
        } else {
            "asymmetric position kernel called with a symmetric configuration"
        };
        return Err(Error::UnsupportedKernel(msg.to_string()));
    }
    Ok(())
}

fn channel_axis_for(input: &ArrayD<f32>, cfg: &QuantConfig, state_len: usize) -> Option<usize> {
    let axis = cfg
        .per_channel
        .then(|| normalize_channel_axis(input.ndim(), cfg.channel_axis));
    let channels = axis.map_or(1, |a| input.len_of(Axis(a)));
    assert_eq!(
        state_len, channels,
        "position state has {state_len} entries but the kernel needs {channels}"
    );
    axis
}

/// Fake quantize with a symmetric power-of-two scale, `scale = 2^position`.
pub fn fake_quantize_pos_sym(
    input: &ArrayD<f32>,
    position: &Array1<f32>,
    cfg: &QuantConfig,
) -> Result<FakeQuantOp> {
    check_kernel_support(KernelFamily::Position, cfg)?;
    check_symmetry(cfg, true)?;
    let (q_min, q_max) = cfg.q_bounds();
    let round = cfg.round_mode;
    let axis = channel_axis_for(input, cfg, position.len());

    let output = match axis {
        Some(a) => map_channels(input, a, |c, x| {
            let scale = position[c].exp2();
            dequantize_sym(quantize_sym(x, scale, q_min, q_max, round), scale)
        }),
        None => {
            let scale = position[0].exp2();
            input.mapv(|x| dequantize_sym(quantize_sym(x, scale, q_min, q_max, round), scale))
        }
    };

    Ok(FakeQuantOp::new(
        output,
        Box::new(PassThroughBackward { slots: 2 }),
    ))
}

/// Fake quantize with an asymmetric power-of-two scale.
///
/// The shift is the adjusted range minimum from the zero-point solver, run
/// against `scale = 2^position` and the calibrated `f_min`.
pub fn fake_quantize_pos_asym(
    input: &ArrayD<f32>,
    position: &Array1<f32>,
    f_min: &Array1<f32>,
    f_max: &Array1<f32>,
    cfg: &QuantConfig,
) -> Result<FakeQuantOp> {
    check_kernel_support(KernelFamily::Position, cfg)?;
    check_symmetry(cfg, false)?;
    let (q_min, q_max) = cfg.q_bounds();
    let round = cfg.round_mode;
    let axis = channel_axis_for(input, cfg, position.len());
    assert_eq!(f_min.len(), position.len(), "f_min length must match position");
    assert_eq!(f_max.len(), position.len(), "f_max length must match position");

    let scale = position.mapv(f32::exp2);
    let (_, new_f_min, _) = quantize_zero_point(&scale, f_min, q_min, q_max);

    let output = match axis {
        Some(a) => map_channels(input, a, |c, x| {
            let q = quantize_asym(x, scale[c], new_f_min[c], q_min, q_max, round);
            dequantize_asym(q, scale[c], new_f_min[c], q_min)
        }),
        None => input.mapv(|x| {
            let q = quantize_asym(x, scale[0], new_f_min[0], q_min, q_max, round);
            dequantize_asym(q, scale[0], new_f_min[0], q_min)
        }),
    };

    Ok(FakeQuantOp::new(
        output,
        Box::new(PassThroughBackward { slots: 4 }),
    ))
}
