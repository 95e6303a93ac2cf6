//! Mode-driven quantization ops
//!
//! One op call is one forward pass of a quantizer. The mode decides what
//! happens to persistent state before the kernel runs:
//!
//! - `Analyse`: collect range statistics, return the input untouched
//! - `Calibrate`: update ranges, (re)fit positions or thresholds, quantize
//! - `Train`: update ranges, quantize with the frozen position or threshold
//! - `Evaluate`: quantize with stored state, writing nothing
//!
//! Updates happen before the kernel reads them, so a calibration batch is
//! quantized against the state it just produced.

use ndarray::{arr1, Array1, ArrayD};
use serde::{Deserialize, Serialize};

use crate::config::{QuantConfig, UpdatePolicy};
use crate::error::{Error, Result};
use crate::kernel::{
    check_kernel_support, fake_quantize_log_th, fake_quantize_min_max, fake_quantize_pos_asym,
    fake_quantize_pos_sym, FakeQuantOp, KernelFamily, PassThroughBackward,
};
use crate::range::get_min_max;
use crate::search::{get_log_th, get_quantize_pos};
use crate::state::{MutableState, RangeState};

/// Where a quantizer is in its lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Observe ranges, pass values through unquantized.
    #[default]
    Analyse,
    /// Fit ranges and power-of-two parameters, quantize.
    Calibrate,
    /// Quantize with frozen power-of-two parameters, ranges keep tracking.
    Train,
    /// Quantize with stored state, writing nothing.
    Evaluate,
}

fn write_with_policy<S: MutableState>(
    state: &mut S,
    value: &Array1<f32>,
    policy: UpdatePolicy,
    zero_debias: bool,
) -> Array1<f32> {
    match policy {
        UpdatePolicy::LastValue => state.write_direct(value),
        UpdatePolicy::MovingAverage { decay } => state.write_ema(value, decay, zero_debias),
    }
}

fn write_range<S: MutableState>(
    input: &ArrayD<f32>,
    range: &mut RangeState<S>,
    cfg: &QuantConfig,
    zero_debias: bool,
) -> (Array1<f32>, Array1<f32>) {
    let (batch_min, batch_max) = get_min_max(input, cfg);
    let lo = write_with_policy(&mut range.min, &batch_min, cfg.update_policy, zero_debias);
    let hi = write_with_policy(&mut range.max, &batch_max, cfg.update_policy, zero_debias);
    (lo, hi)
}

fn identity_op(input: &ArrayD<f32>) -> FakeQuantOp {
    FakeQuantOp::new(input.clone(), Box::new(PassThroughBackward { slots: 1 }))
}

fn check_min_max_policy(cfg: &QuantConfig) -> Result<()> {
    if matches!(cfg.update_policy, UpdatePolicy::MovingAverage { .. }) && cfg.symmetry {
        return Err(Error::UnsupportedUpdatePolicy(
            "moving-average range tracking requires asymmetric quantization".into(),
        ));
    }
    Ok(())
}

fn check_last_value_policy(cfg: &QuantConfig) -> Result<()> {
    if matches!(cfg.update_policy, UpdatePolicy::MovingAverage { .. }) {
        return Err(Error::UnsupportedUpdatePolicy(
            "power-of-two quantizers track ranges by last value only".into(),
        ));
    }
    Ok(())
}

/// Float-scale min-max quantization driven by the mode state machine.
pub fn quantize_min_max<S: MutableState>(
    input: &ArrayD<f32>,
    range: &mut RangeState<S>,
    mode: Mode,
    cfg: &QuantConfig,
) -> Result<FakeQuantOp> {
    check_kernel_support(KernelFamily::MinMax, cfg)?;
    check_min_max_policy(cfg)?;

    match mode {
        Mode::Analyse => {
            write_range(input, range, cfg, false);
            Ok(identity_op(input))
        }
        Mode::Calibrate | Mode::Train => {
            let (lo, hi) = write_range(input, range, cfg, true);
            fake_quantize_min_max(input, &lo, &hi, cfg)
        }
        Mode::Evaluate => {
            let (lo, hi) = range.read();
            fake_quantize_min_max(input, &lo, &hi, cfg)
        }
    }
}

fn position_kernel(
    input: &ArrayD<f32>,
    pos: &Array1<f32>,
    lo: &Array1<f32>,
    hi: &Array1<f32>,
    cfg: &QuantConfig,
) -> Result<FakeQuantOp> {
    if cfg.symmetry {
        fake_quantize_pos_sym(input, pos, cfg)
    } else {
        fake_quantize_pos_asym(input, pos, lo, hi, cfg)
    }
}

/// Power-of-two position quantization driven by the mode state machine.
///
/// The position is searched and written only while calibrating. Training
/// passes keep updating the range but quantize with the frozen position, so
/// a quantizer must see at least one `Calibrate` pass before `Train` or
/// `Evaluate` produces anything useful.
pub fn quantize_with_position<S: MutableState>(
    input: &ArrayD<f32>,
    position: &mut S,
    range: &mut RangeState<S>,
    mode: Mode,
    cfg: &QuantConfig,
) -> Result<FakeQuantOp> {
    check_kernel_support(KernelFamily::Position, cfg)?;
    check_last_value_policy(cfg)?;

    match mode {
        Mode::Analyse => {
            write_range(input, range, cfg, false);
            Ok(identity_op(input))
        }
        Mode::Calibrate => {
            let (lo, hi) = write_range(input, range, cfg, true);
            let batch_pos = get_quantize_pos(input, &lo, &hi, cfg)?;
            let pos = position.write_direct(&batch_pos);
            position_kernel(input, &pos, &lo, &hi, cfg)
        }
        Mode::Train => {
            let (lo, hi) = write_range(input, range, cfg, true);
            let pos = position.read();
            position_kernel(input, &pos, &lo, &hi, cfg)
        }
        Mode::Evaluate => {
            let (lo, hi) = range.read();
            let pos = position.read();
            position_kernel(input, &pos, &lo, &hi, cfg)
        }
    }
}

fn read_log_th<S: MutableState>(state: &S) -> f32 {
    let th = state.read();
    assert_eq!(th.len(), 1, "log threshold state must hold a single entry");
    th[0]
}

/// Log-threshold quantization driven by the mode state machine.
///
/// The threshold is searched and written only while calibrating; training
/// reads it back frozen. Its gradient is exposed through the returned op for
/// callers that train the threshold externally.
pub fn quantize_with_log_threshold<S: MutableState>(
    input: &ArrayD<f32>,
    log_th: &mut S,
    range: &mut RangeState<S>,
    mode: Mode,
    cfg: &QuantConfig,
) -> Result<FakeQuantOp> {
    check_kernel_support(KernelFamily::LogThreshold, cfg)?;
    check_last_value_policy(cfg)?;

    match mode {
        Mode::Analyse => {
            write_range(input, range, cfg, false);
            Ok(identity_op(input))
        }
        Mode::Calibrate => {
            let (lo, hi) = write_range(input, range, cfg, true);
            let batch_th = get_log_th(lo[0], hi[0], cfg)?;
            let th = log_th.write_direct(&arr1(&[batch_th]));
            fake_quantize_log_th(input, th[0], cfg)
        }
        Mode::Train => {
            write_range(input, range, cfg, true);
            fake_quantize_log_th(input, read_log_th(log_th), cfg)
        }
        Mode::Evaluate => fake_quantize_log_th(input, read_log_th(log_th), cfg),
    }
}
