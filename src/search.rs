//! Power-of-two position and log-threshold searches
//!
//! Calibration turns a float range into power-of-two parameters:
//!
//! - non-overflow: the largest scale whose grid still covers the range
//! - min-diffs: tries the non-overflow position plus four sharper ones and
//!   keeps the one with the smallest total squared reconstruction error
//!
//! Positions are per-channel vectors, log thresholds are per-tensor scalars.

use ndarray::{Array1, ArrayD, Axis, Zip};

use crate::config::{PositionMethod, QuantConfig};
use crate::error::{Error, Result};
use crate::kernel::fake_quantize_sym_value;
use crate::range::normalize_channel_axis;
use crate::round::RoundMode;

/// Floor for the inverse scale, 2^-52. A range collapsed to zero maps to
/// position 52 instead of an infinite one.
const SCALE_INV_EPSILON: f32 = f64::EPSILON as f32;

/// Largest power-of-two position whose symmetric grid covers `[f_min, f_max]`.
pub fn quantize_pos_non_overflow(
    f_min: &Array1<f32>,
    f_max: &Array1<f32>,
    q_min: f32,
    q_max: f32,
) -> Array1<f32> {
    Zip::from(f_min).and(f_max).map_collect(|&lo, &hi| {
        let scale_inv = (lo / q_min).max(hi / q_max).max(SCALE_INV_EPSILON);
        (-scale_inv.log2()).floor()
    })
}

/// Largest power-of-two position whose asymmetric grid covers `[f_min, f_max]`.
pub fn quantize_pos_non_overflow_asym(
    f_min: &Array1<f32>,
    f_max: &Array1<f32>,
    q_min: f32,
    q_max: f32,
) -> Array1<f32> {
    Zip::from(f_min).and(f_max).map_collect(|&lo, &hi| {
        let scale_inv = ((hi - lo) / (q_max - q_min)).max(SCALE_INV_EPSILON);
        (-scale_inv.log2()).floor()
    })
}

/// Position search by reconstruction error, symmetric only.
///
/// Starts from the non-overflow position and evaluates five candidates,
/// `base + 0` through `base + 4`. Candidates share one offset across all
/// channels and the error is summed over the whole tensor. Ties keep the
/// smallest offset.
pub fn quantize_pos_min_diffs(
    input: &ArrayD<f32>,
    f_min: &Array1<f32>,
    f_max: &Array1<f32>,
    cfg: &QuantConfig,
) -> Result<Array1<f32>> {
    if cfg.round_mode == RoundMode::HalfAwayFromZero {
        return Err(Error::UnsupportedPositionMethod(format!(
            "min-diffs position search supports half-to-even and half-up rounding, got {:?}",
            cfg.round_mode
        )));
    }
    let (q_min, q_max) = cfg.q_bounds();
    let round = cfg.round_mode;
    let axis = cfg
        .per_channel
        .then(|| normalize_channel_axis(input.ndim(), cfg.channel_axis));
    let channels = axis.map_or(1, |a| input.len_of(Axis(a)));
    assert_eq!(
        f_min.len(),
        channels,
        "range state has {} entries but the search needs {channels}",
        f_min.len()
    );

    let base = quantize_pos_non_overflow(f_min, f_max, q_min, q_max);

    let mut best_offset = 0usize;
    let mut best_err = f32::INFINITY;
    for offset in 0..5 {
        let err = match axis {
            Some(a) => {
                let mut total = 0.0f32;
                for (c, lane) in input.axis_iter(Axis(a)).enumerate() {
                    let scale = (base[c] + offset as f32).exp2();
                    for &x in lane.iter() {
                        let d = fake_quantize_sym_value(x, scale, q_min, q_max, round) - x;
                        total += d * d;
                    }
                }
                total
            }
            None => {
                let scale = (base[0] + offset as f32).exp2();
                input.iter().fold(0.0f32, |acc, &x| {
                    let d = fake_quantize_sym_value(x, scale, q_min, q_max, round) - x;
                    acc + d * d
                })
            }
        };
        if err < best_err {
            best_err = err;
            best_offset = offset;
        }
    }

    Ok(base.mapv(|p| p + best_offset as f32))
}

/// Position search dispatch on symmetry and configured method.
pub fn get_quantize_pos(
    input: &ArrayD<f32>,
    f_min: &Array1<f32>,
    f_max: &Array1<f32>,
    cfg: &QuantConfig,
) -> Result<Array1<f32>> {
    let (q_min, q_max) = cfg.q_bounds();
    match (cfg.symmetry, cfg.position_method) {
        (true, PositionMethod::NonOverflow) => {
            Ok(quantize_pos_non_overflow(f_min, f_max, q_min, q_max))
        }
        (true, PositionMethod::MinDiffs) => quantize_pos_min_diffs(input, f_min, f_max, cfg),
        (false, PositionMethod::NonOverflow) => {
            Ok(quantize_pos_non_overflow_asym(f_min, f_max, q_min, q_max))
        }
        (false, PositionMethod::MinDiffs) => Err(Error::UnsupportedPositionMethod(
            "min-diffs position search is not available for asymmetric quantization".into(),
        )),
    }
}

/// Smallest log2 threshold at which no value in `[f_min, f_max]` overflows.
pub fn log_th_non_overflow(f_min: f32, f_max: f32, q_min: f32, q_max: f32) -> f32 {
    let th = f_min.abs().max(f_max * (-q_min / q_max)).max(1e-9);
    th.log2()
}

/// Log-threshold search dispatch on the configured method.
pub fn get_log_th(f_min: f32, f_max: f32, cfg: &QuantConfig) -> Result<f32> {
    let (q_min, q_max) = cfg.q_bounds();
    match cfg.position_method {
        PositionMethod::NonOverflow => Ok(log_th_non_overflow(f_min, f_max, q_min, q_max)),
        PositionMethod::MinDiffs => Err(Error::UnsupportedPositionMethod(
            "min-diffs threshold search is not implemented".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr1, arr2};
    use proptest::prelude::*;

    #[test]
    fn test_non_overflow_sym() {
        // 1/127 dominates 1/128, floor(-log2) is 6
        let pos = quantize_pos_non_overflow(&arr1(&[-1.0]), &arr1(&[1.0]), -128.0, 127.0);
        assert_abs_diff_eq!(pos[0], 6.0);

        // exact power of two on the negative side
        let pos = quantize_pos_non_overflow(&arr1(&[-1.0]), &arr1(&[0.5]), -128.0, 127.0);
        assert_abs_diff_eq!(pos[0], 7.0);

        let pos = quantize_pos_non_overflow(
            &arr1(&[-1.0, -4.0]),
            &arr1(&[1.0, 4.0]),
            -128.0,
            127.0,
        );
        assert_abs_diff_eq!(pos[0], 6.0);
        assert_abs_diff_eq!(pos[1], 4.0);
    }

    #[test]
    fn test_non_overflow_collapsed_range() {
        let pos = quantize_pos_non_overflow(&arr1(&[0.0]), &arr1(&[0.0]), -128.0, 127.0);
        assert_abs_diff_eq!(pos[0], 52.0);

        let pos = quantize_pos_non_overflow_asym(&arr1(&[0.0]), &arr1(&[0.0]), -128.0, 127.0);
        assert_abs_diff_eq!(pos[0], 52.0);
    }

    #[test]
    fn test_non_overflow_asym() {
        // span/255: [0, 1] lands at 7, [0, 2] at 6
        let pos = quantize_pos_non_overflow_asym(&arr1(&[0.0]), &arr1(&[1.0]), -128.0, 127.0);
        assert_abs_diff_eq!(pos[0], 7.0);

        let pos = quantize_pos_non_overflow_asym(&arr1(&[0.0]), &arr1(&[2.0]), -128.0, 127.0);
        assert_abs_diff_eq!(pos[0], 6.0);
    }

    #[test]
    fn test_min_diffs_prefers_sharper_grid() {
        // Small values waste the non-overflow grid. Offsets 3 and 4
        // reconstruct identically, the tie keeps 3.
        let cfg = QuantConfig::int8().with_position_method(PositionMethod::MinDiffs);
        let input = arr1(&[0.01, -0.01]).into_dyn();
        let pos = quantize_pos_min_diffs(&input, &arr1(&[-1.0]), &arr1(&[1.0]), &cfg).unwrap();
        assert_abs_diff_eq!(pos[0], 9.0);
    }

    #[test]
    fn test_min_diffs_zero_input_keeps_base() {
        let cfg = QuantConfig::int8().with_position_method(PositionMethod::MinDiffs);
        let input = arr1(&[0.0, 0.0]).into_dyn();
        let pos = quantize_pos_min_diffs(&input, &arr1(&[-1.0]), &arr1(&[1.0]), &cfg).unwrap();
        assert_abs_diff_eq!(pos[0], 6.0);
    }

    #[test]
    fn test_min_diffs_offset_is_shared_across_channels() {
        // Alone, the small channel would take offset 3. The large channel
        // saturates past offset 1, so the shared winner is 1.
        let cfg = QuantConfig::int8()
            .per_channel(-1)
            .with_position_method(PositionMethod::MinDiffs);
        let input = arr2(&[[0.01, 0.5], [-0.01, -0.5]]).into_dyn();
        let pos = quantize_pos_min_diffs(
            &input,
            &arr1(&[-1.0, -1.0]),
            &arr1(&[1.0, 1.0]),
            &cfg,
        )
        .unwrap();
        assert_abs_diff_eq!(pos[0], 7.0);
        assert_abs_diff_eq!(pos[1], 7.0);
    }

    #[test]
    fn test_min_diffs_rejects_half_away_from_zero() {
        let cfg = QuantConfig::int8()
            .with_round_mode(RoundMode::HalfAwayFromZero)
            .with_position_method(PositionMethod::MinDiffs);
        let input = arr1(&[0.5]).into_dyn();
        let err = quantize_pos_min_diffs(&input, &arr1(&[-1.0]), &arr1(&[1.0]), &cfg);
        assert!(matches!(err, Err(Error::UnsupportedPositionMethod(_))));
    }

    #[test]
    fn test_get_quantize_pos_dispatch() {
        let input = arr1(&[0.5]).into_dyn();
        let f_min = arr1(&[-1.0]);
        let f_max = arr1(&[1.0]);

        let sym = get_quantize_pos(&input, &f_min, &f_max, &QuantConfig::int8()).unwrap();
        assert_abs_diff_eq!(sym[0], 6.0);

        let asym = get_quantize_pos(
            &input,
            &arr1(&[0.0]),
            &f_max,
            &QuantConfig::int8().asymmetric(),
        )
        .unwrap();
        assert_abs_diff_eq!(asym[0], 7.0);

        let bad = QuantConfig::int8()
            .asymmetric()
            .with_position_method(PositionMethod::MinDiffs);
        assert!(matches!(
            get_quantize_pos(&input, &f_min, &f_max, &bad),
            Err(Error::UnsupportedPositionMethod(_))
        ));
    }

    #[test]
    fn test_log_th_non_overflow() {
        // negative side dominates: threshold 2, log2 is exactly 1
        let th = log_th_non_overflow(-2.0, 1.0, -128.0, 127.0);
        assert_abs_diff_eq!(th, 1.0, epsilon = 1e-6);

        // positive side needs headroom for the asymmetric grid
        let th = log_th_non_overflow(-1.0, 1.0, -128.0, 127.0);
        assert_abs_diff_eq!(th.exp2(), 128.0 / 127.0, epsilon = 1e-6);

        // collapsed range hits the 1e-9 floor
        let th = log_th_non_overflow(0.0, 0.0, -128.0, 127.0);
        assert_abs_diff_eq!(th, 1e-9f32.log2(), epsilon = 1e-4);
    }

    #[test]
    fn test_get_log_th_dispatch() {
        let th = get_log_th(-2.0, 1.0, &QuantConfig::int8()).unwrap();
        assert_abs_diff_eq!(th, 1.0, epsilon = 1e-6);

        let bad = QuantConfig::int8().with_position_method(PositionMethod::MinDiffs);
        assert!(matches!(
            get_log_th(-1.0, 1.0, &bad),
            Err(Error::UnsupportedPositionMethod(_))
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_non_overflow_grid_covers_range(
            lo in -1000.0f32..0.0,
            hi in 0.0f32..1000.0,
        ) {
            let pos = quantize_pos_non_overflow(&arr1(&[lo]), &arr1(&[hi]), -128.0, 127.0);
            let scale = pos[0].exp2();
            // no value in range overflows the integer grid at this scale
            prop_assert!((lo * scale).round() >= -128.0 - 0.5);
            prop_assert!((hi * scale).round() <= 127.0 + 0.5);
        }

        #[test]
        fn prop_min_diffs_is_deterministic(
            values in proptest::collection::vec(-2.0f32..2.0, 1..32),
        ) {
            let cfg = QuantConfig::int8().with_position_method(PositionMethod::MinDiffs);
            let input = arr1(&values).into_dyn();
            let f_min = arr1(&[-2.0]);
            let f_max = arr1(&[2.0]);
            let a = quantize_pos_min_diffs(&input, &f_min, &f_max, &cfg).unwrap();
            let b = quantize_pos_min_diffs(&input, &f_min, &f_max, &cfg).unwrap();
            prop_assert_eq!(a, b);
        }

        #[test]
        fn prop_min_diffs_never_below_base(
            values in proptest::collection::vec(-1.0f32..1.0, 1..16),
        ) {
            let cfg = QuantConfig::int8().with_position_method(PositionMethod::MinDiffs);
            let input = arr1(&values).into_dyn();
            let f_min = arr1(&[-1.0]);
            let f_max = arr1(&[1.0]);
            let base = quantize_pos_non_overflow(&f_min, &f_max, -128.0, 127.0);
            let pos = quantize_pos_min_diffs(&input, &f_min, &f_max, &cfg).unwrap();
            prop_assert!(pos[0] >= base[0]);
            prop_assert!(pos[0] <= base[0] + 4.0);
        }
    }
}
