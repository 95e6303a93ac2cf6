//! Log-threshold kernel
//!
//! The threshold is the log2 of the largest representable magnitude, so the
//! power-of-two position is `bit_width - 1 - ceil(log_th)` and the scale is
//! `2^position`. Unlike the position kernels the threshold is trainable: the
//! backward pass produces a scalar threshold gradient next to the masked
//! input gradient.
//!
//! Backward slots: `[input, log_th]`.

use std::f32::consts::LN_2;

use ndarray::{arr0, ArrayD, Zip};

use crate::config::QuantConfig;
use crate::error::Result;
use crate::round::RoundMode;

use super::{
    check_kernel_support, dequantize_sym, quantize_sym, FakeQuantOp, KernelFamily, QuantBackwardOp,
};

/// Fake quantize against a log2 threshold, per-tensor symmetric only.
pub fn fake_quantize_log_th(
    input: &ArrayD<f32>,
    log_th: f32,
    cfg: &QuantConfig,
) -> Result<FakeQuantOp> {
    check_kernel_support(KernelFamily::LogThreshold, cfg)?;
    let (q_min, q_max) = cfg.q_bounds();
    let round = cfg.round_mode;

    let position = cfg.bit_width as f32 - 1.0 - log_th.ceil();
    let scale = position.exp2();
    let output = input.mapv(|x| dequantize_sym(quantize_sym(x, scale, q_min, q_max, round), scale));

    let backward = LogThBackward {
        input: input.clone(),
        output: output.clone(),
        scale,
        round,
        q_min,
        q_max,
    };
    Ok(FakeQuantOp::new(output, Box::new(backward)))
}

struct LogThBackward {
    input: ArrayD<f32>,
    output: ArrayD<f32>,
    scale: f32,
    round: RoundMode,
    q_min: f32,
    q_max: f32,
}

impl LogThBackward {
    /// An element is in range when its code fits the integer grid before
    /// clipping.
    fn in_range(&self, x: f32) -> bool {
        let code = self.round.round(x * self.scale);
        code >= self.q_min && code <= self.q_max
    }
}

impl QuantBackwardOp for LogThBackward {
    fn backward(&self, dy: &ArrayD<f32>) -> Vec<Option<ArrayD<f32>>> {
        let grad_input = Zip::from(dy)
            .and(&self.input)
            .map_collect(|&g, &x| if self.in_range(x) { g } else { 0.0 });

        // In-range elements pull the threshold by their rounding error,
        // saturated elements by their full clipped value.
        let grad_th = Zip::from(dy)
            .and(&self.input)
            .and(&self.output)
            .fold(0.0f32, |acc, &g, &x, &out| {
                let term = if self.in_range(x) { out - x } else { out };
                acc + g * LN_2 * term
            });

        vec![Some(grad_input), Some(arr0(grad_th).into_dyn())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, IxDyn};

    fn tensor(values: &[f32]) -> ArrayD<f32> {
        arr1(values).into_dyn()
    }

    #[test]
    fn test_threshold_sets_power_of_two_scale() {
        let cfg = QuantConfig::int8();

        // log_th 0: position 7, scale 128
        let out = fake_quantize_log_th(&tensor(&[0.5]), 0.0, &cfg).unwrap().into_output();
        assert_abs_diff_eq!(out[[0]], 0.5, epsilon = 1e-7);

        // log_th 2.1: ceil is 3, position 4, scale 16
        let out = fake_quantize_log_th(&tensor(&[0.5, 0.03]), 2.1, &cfg)
            .unwrap()
            .into_output();
        assert_abs_diff_eq!(out[[0]], 0.5, epsilon = 1e-7);
        assert_abs_diff_eq!(out[[1]], 0.0, epsilon = 1e-7);
    }

    #[test]
    fn test_saturation_at_threshold() {
        let cfg = QuantConfig::int8();
        // scale 128: 1.5 scales to 192, clipped to 127
        let out = fake_quantize_log_th(&tensor(&[1.5]), 0.0, &cfg).unwrap().into_output();
        assert_abs_diff_eq!(out[[0]], 127.0 / 128.0, epsilon = 1e-7);
    }

    #[test]
    fn test_round_mode_on_tie() {
        // 129/256 scales to exactly 64.5
        let input = tensor(&[129.0 / 256.0]);

        let even = fake_quantize_log_th(&input, 0.0, &QuantConfig::int8())
            .unwrap()
            .into_output();
        assert_abs_diff_eq!(even[[0]], 64.0 / 128.0, epsilon = 1e-7);

        let up_cfg = QuantConfig::int8().with_round_mode(RoundMode::HalfUp);
        let up = fake_quantize_log_th(&input, 0.0, &up_cfg).unwrap().into_output();
        assert_abs_diff_eq!(up[[0]], 65.0 / 128.0, epsilon = 1e-7);
    }

    #[test]
    fn test_gradient_masks_input_and_accumulates_threshold() {
        let cfg = QuantConfig::int8();
        // 0.5 is exactly representable, 1.5 saturates
        let input = tensor(&[0.5, 1.5]);
        let op = fake_quantize_log_th(&input, 0.0, &cfg).unwrap();

        let dy = tensor(&[1.0, 1.0]);
        let grads = op.backward(&dy);
        assert_eq!(grads.len(), 2);

        let grad_input = grads[0].as_ref().unwrap();
        assert_abs_diff_eq!(grad_input[[0]], 1.0, epsilon = 1e-7);
        assert_abs_diff_eq!(grad_input[[1]], 0.0, epsilon = 1e-7);

        // in-range term is zero (exact code), saturated term is the output
        let grad_th = grads[1].as_ref().unwrap();
        assert_eq!(grad_th.ndim(), 0);
        assert_abs_diff_eq!(
            grad_th[IxDyn(&[])],
            LN_2 * (127.0 / 128.0),
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_threshold_gradient_weights_rounding_error() {
        let cfg = QuantConfig::int8();
        // 0.3 scales to 38.4, code 38, output 0.296875
        let input = tensor(&[0.3]);
        let op = fake_quantize_log_th(&input, 0.0, &cfg).unwrap();

        let grads = op.backward(&tensor(&[2.0]));
        let expected = 2.0 * LN_2 * (38.0 / 128.0 - 0.3);
        assert_abs_diff_eq!(
            grads[1].as_ref().unwrap()[IxDyn(&[])],
            expected,
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_rejects_per_channel_and_asymmetric() {
        let input = tensor(&[1.0]);

        let pc = QuantConfig::int8().per_channel(-1);
        assert!(matches!(
            fake_quantize_log_th(&input, 0.0, &pc),
            Err(Error::UnsupportedKernel(_))
        ));

        let asym = QuantConfig::int8().asymmetric();
        assert!(matches!(
            fake_quantize_log_th(&input, 0.0, &asym),
            Err(Error::UnsupportedKernel(_))
        ));
    }
}
