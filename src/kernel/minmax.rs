//! Float-scale min-max kernels
//!
//! Quantize → dequantize driven by a calibrated `[f_min, f_max]` range. The
//! symmetric kernel maps the range straight onto the grid; the asymmetric
//! kernel first solves the zero point and shifts by the adjusted minimum, so
//! float zero is always representable exactly.
//!
//! Backward slots: `[input, f_min, f_max]`. The input gradient is `dy` masked
//! to the range (the adjusted range in asymmetric mode); the range gradients
//! are the sums of `dy` over the elements clipped below and above.

use ndarray::{Array1, ArrayD, Axis, Zip};

use crate::config::QuantConfig;
use crate::error::Result;
use crate::range::{get_scale, normalize_channel_axis};
use crate::zero_point::quantize_zero_point;

use super::{
    check_kernel_support, dequantize_asym, dequantize_sym, map_channels, quantize_asym,
    quantize_sym, FakeQuantOp, KernelFamily, QuantBackwardOp,
};

/// Fake quantize `input` against the calibrated range.
///
/// `f_min`/`f_max` carry one entry per channel, or a single entry in
/// per-tensor mode. Their length must match the channel count of `input`.
pub fn fake_quantize_min_max(
    input: &ArrayD<f32>,
    f_min: &Array1<f32>,
    f_max: &Array1<f32>,
    cfg: &QuantConfig,
) -> Result<FakeQuantOp> {
    check_kernel_support(KernelFamily::MinMax, cfg)?;
    let (q_min, q_max) = cfg.q_bounds();
    let round = cfg.round_mode;

    let axis = cfg
        .per_channel
        .then(|| normalize_channel_axis(input.ndim(), cfg.channel_axis));
    let channels = axis.map_or(1, |a| input.len_of(Axis(a)));
    assert_eq!(
        f_min.len(),
        channels,
        "range state has {} entries but the kernel needs {channels}",
        f_min.len()
    );
    assert_eq!(f_max.len(), channels, "f_min and f_max must have equal length");

    let scale = get_scale(f_min, f_max, q_min, q_max);

    let (output, lower, upper) = if cfg.symmetry {
        let output = match axis {
            Some(a) => map_channels(input, a, |c, x| {
                dequantize_sym(quantize_sym(x, scale[c], q_min, q_max, round), scale[c])
            }),
            None => input.mapv(|x| {
                dequantize_sym(quantize_sym(x, scale[0], q_min, q_max, round), scale[0])
            }),
        };
        (output, f_min.clone(), f_max.clone())
    } else {
        let (_, new_f_min, new_f_max) = quantize_zero_point(&scale, f_min, q_min, q_max);
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
        (output, new_f_min, new_f_max)
    };

    let backward = MinMaxBackward {
        input: input.clone(),
        lower,
        upper,
        axis,
    };
    Ok(FakeQuantOp::new(output, Box::new(backward)))
}

/// Clamped straight-through estimator for the min-max kernels.
struct MinMaxBackward {
    input: ArrayD<f32>,
    lower: Array1<f32>,
    upper: Array1<f32>,
    axis: Option<usize>,
}

impl QuantBackwardOp for MinMaxBackward {
    fn backward(&self, dy: &ArrayD<f32>) -> Vec<Option<ArrayD<f32>>> {
        let (grad_input, grad_min, grad_max) = match self.axis {
            None => {
                let (lo, hi) = (self.lower[0], self.upper[0]);
                let grad_input = Zip::from(dy)
                    .and(&self.input)
                    .map_collect(|&g, &x| if x >= lo && x <= hi { g } else { 0.0 });
                let grad_min = Zip::from(dy)
                    .and(&self.input)
                    .fold(0.0, |acc, &g, &x| if x < lo { acc + g } else { acc });
                let grad_max = Zip::from(dy)
                    .and(&self.input)
                    .fold(0.0, |acc, &g, &x| if x > hi { acc + g } else { acc });
                (grad_input, ndarray::arr1(&[grad_min]), ndarray::arr1(&[grad_max]))
            }
            Some(a) => {
                let channels = self.input.len_of(Axis(a));
                let mut grad_input = ArrayD::zeros(dy.raw_dim());
                let mut grad_min = Array1::zeros(channels);
                let mut grad_max = Array1::zeros(channels);
                for c in 0..channels {
                    let (lo, hi) = (self.lower[c], self.upper[c]);
                    let dy_c = dy.index_axis(Axis(a), c);
                    let in_c = self.input.index_axis(Axis(a), c);
                    grad_input.index_axis_mut(Axis(a), c).assign(
                        &Zip::from(&dy_c)
                            .and(&in_c)
                            .map_collect(|&g, &x| if x >= lo && x <= hi { g } else { 0.0 }),
                    );
                    grad_min[c] = Zip::from(&dy_c)
                        .and(&in_c)
                        .fold(0.0, |acc, &g, &x| if x < lo { acc + g } else { acc });
                    grad_max[c] = Zip::from(&dy_c)
                        .and(&in_c)
                        .fold(0.0, |acc, &g, &x| if x > hi { acc + g } else { acc });
                }
                (grad_input, grad_min, grad_max)
            }
        };

        vec![
            Some(grad_input),
            Some(grad_min.into_dyn()),
            Some(grad_max.into_dyn()),
        ]
    }
}
