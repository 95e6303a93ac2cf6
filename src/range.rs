//! Range estimation
//!
//! Derives the float range a quantizer covers from batch statistics:
//! - Asymmetric ranges are widened to include zero, so a zero code always
//!   exists.
//! - Symmetric ranges either reflect around zero (narrow range) or stretch to
//!   the full signed grid, whose negative side is one step larger.
//!
//! Statistics are per-tensor (length-1 vectors) or per-channel (one entry per
//! channel slice). Tensors of rank 0 or 1 have no channel structure, so
//! per-channel statistics degrade to per-element there.

use ndarray::{Array1, ArrayD, Axis, Zip};

use crate::config::QuantConfig;

/// Resolve a possibly negative channel axis against a tensor rank.
///
/// Panics when the axis is out of range; that is a caller bug, not a
/// recoverable configuration error.
pub(crate) fn normalize_channel_axis(ndim: usize, channel_axis: isize) -> usize {
    let axis = if channel_axis < 0 {
        ndim as isize + channel_axis
    } else {
        channel_axis
    };
    assert!(
        axis >= 0 && (axis as usize) < ndim,
        "channel axis {channel_axis} out of range for tensor of rank {ndim}"
    );
    axis as usize
}

/// Minimum and maximum of one batch.
///
/// Per-tensor mode reduces everything to length-1 vectors. Per-channel mode
/// reduces over all axes except `channel_axis`, one entry per channel; for
/// tensors of rank below 2 every element is its own channel.
pub fn batch_min_max(
    input: &ArrayD<f32>,
    per_channel: bool,
    channel_axis: isize,
) -> (Array1<f32>, Array1<f32>) {
    assert!(!input.is_empty(), "cannot take batch statistics of an empty tensor");

    if per_channel {
        if input.ndim() >= 2 {
            let axis = normalize_channel_axis(input.ndim(), channel_axis);
            let channels = input.len_of(Axis(axis));
            let mut mins = Array1::zeros(channels);
            let mut maxs = Array1::zeros(channels);
            for c in 0..channels {
                let slice = input.index_axis(Axis(axis), c);
                mins[c] = slice.fold(f32::INFINITY, |acc, &x| acc.min(x));
                maxs[c] = slice.fold(f32::NEG_INFINITY, |acc, &x| acc.max(x));
            }
            (mins, maxs)
        } else {
            let flat: Array1<f32> = input.iter().copied().collect();
            (flat.clone(), flat)
        }
    } else {
        let min = input.fold(f32::INFINITY, |acc, &x| acc.min(x));
        let max = input.fold(f32::NEG_INFINITY, |acc, &x| acc.max(x));
        (ndarray::arr1(&[min]), ndarray::arr1(&[max]))
    }
}

/// Batch statistics mapped onto the range convention of `cfg`.
///
/// Asymmetric: `range = [min(batch_min, 0), max(batch_max, 0)]`.
/// Symmetric narrow range: reflect, `[min(b_min, -b_max), max(b_max, -b_min)]`.
/// Symmetric full range: stretch by `ratio = -((2^bits)-2) / 2^bits` so the
/// grid's extra negative code is used:
/// `[min(b_min, b_max/ratio), max(b_max, b_min*ratio)]`.
pub fn get_min_max(input: &ArrayD<f32>, cfg: &QuantConfig) -> (Array1<f32>, Array1<f32>) {
    let (batch_min, batch_max) = batch_min_max(input, cfg.per_channel, cfg.channel_axis);

    if !cfg.symmetry {
        let range_min = batch_min.mapv(|m| m.min(0.0));
        let range_max = batch_max.mapv(|m| m.max(0.0));
        (range_min, range_max)
    } else if cfg.narrow_range {
        let range_min = Zip::from(&batch_min)
            .and(&batch_max)
            .map_collect(|&lo, &hi| lo.min(-hi));
        let range_max = Zip::from(&batch_min)
            .and(&batch_max)
            .map_collect(|&lo, &hi| hi.max(-lo));
        (range_min, range_max)
    } else {
        let full = 2.0f32.powi(cfg.bit_width as i32);
        let ratio = -(full - 2.0) / full;
        let range_min = Zip::from(&batch_min)
            .and(&batch_max)
            .map_collect(|&lo, &hi| lo.min(hi / ratio));
        let range_max = Zip::from(&batch_min)
            .and(&batch_max)
            .map_collect(|&lo, &hi| hi.max(lo * ratio));
        (range_min, range_max)
    }
}

/// Float scale mapping `[f_min, f_max]` onto `[q_min, q_max]`:
/// `scale = (q_max - q_min) / (f_max - f_min)`.
///
/// A degenerate range (`f_max == f_min`) yields a non-finite scale; the range
/// conventions above keep zero inside every calibrated range, so this only
/// occurs for all-zero batches.
pub fn get_scale(f_min: &Array1<f32>, f_max: &Array1<f32>, q_min: f32, q_max: f32) -> Array1<f32> {
    Zip::from(f_min)
        .and(f_max)
        .map_collect(|&lo, &hi| (q_max - q_min) / (hi - lo))
}
