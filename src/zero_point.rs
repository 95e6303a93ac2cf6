//! Zero-point solver for asymmetric quantization
//!
//! Snaps the float zero point onto the integer grid and adjusts the float
//! range so that dequantized zero is exact. The rounding here is always
//! half-away-from-zero, independent of the kernel's configured round mode;
//! exported integer models depend on that exact behavior.

use ndarray::Array1;

use crate::round::round_half_away_from_zero;

fn zero_point_scalar(scale: f32, f_min: f32, q_min: f32, q_max: f32) -> (f32, f32, f32) {
    let f_zero_point = q_min - f_min * scale;

    let q_zero_point = if f_zero_point < q_min {
        q_min
    } else if f_zero_point > q_max {
        q_max
    } else {
        round_half_away_from_zero(f_zero_point)
    };

    let new_f_min = (q_min - q_zero_point) / scale;
    let new_f_max = (q_max - q_zero_point) / scale;
    (q_zero_point, new_f_min, new_f_max)
}

/// Solve the integer zero point for each channel.
///
/// Returns `(zero_point, new_f_min, new_f_max)` where
/// `zero_point = clamp(round(q_min - f_min * scale))` and the new bounds are
/// the float values of the grid ends under that zero point:
/// `new_f_min = (q_min - zero_point) / scale`,
/// `new_f_max = (q_max - zero_point) / scale`.
///
/// `new_f_min` doubles as the shift of the asymmetric kernels, and the new
/// bounds are the clip boundaries of their input gradient.
pub fn quantize_zero_point(
    scale: &Array1<f32>,
    f_min: &Array1<f32>,
    q_min: f32,
    q_max: f32,
) -> (Array1<f32>, Array1<f32>, Array1<f32>) {
    let mut zero_point = Vec::with_capacity(scale.len());
    let mut new_f_min = Vec::with_capacity(scale.len());
    let mut new_f_max = Vec::with_capacity(scale.len());

    for (&s, &lo) in scale.iter().zip(f_min.iter()) {
        let (zp, lo2, hi2) = zero_point_scalar(s, lo, q_min, q_max);
        zero_point.push(zp);
        new_f_min.push(lo2);
        new_f_max.push(hi2);
    }

    (
        Array1::from(zero_point),
        Array1::from(new_f_min),
        Array1::from(new_f_max),
    )
}
