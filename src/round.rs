//! Deterministic rounding strategies
//!
//! Quantization output must match the target hardware bit-for-bit, so the
//! tie-breaking rule of every rounding step is pinned down explicitly:
//! - **HalfToEven**: banker's rounding, the default for weights
//! - **HalfUp**: `floor(x + 0.5)`, used by DPU-style activation paths
//! - **HalfAwayFromZero**: C `std::round`, used by the zero-point solver

use serde::{Deserialize, Serialize};

/// Tie-breaking rule applied when a scaled value lands exactly between two
/// integers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RoundMode {
    /// Round half to the nearest even integer
    #[default]
    HalfToEven,
    /// Round half toward positive infinity
    HalfUp,
    /// Round half away from zero
    HalfAwayFromZero,
}

impl RoundMode {
    /// Round `x` to the nearest integer under this tie-breaking rule.
    pub fn round(self, x: f32) -> f32 {
        match self {
            RoundMode::HalfToEven => round_half_to_even(x),
            RoundMode::HalfUp => round_half_up(x),
            RoundMode::HalfAwayFromZero => round_half_away_from_zero(x),
        }
    }
}

/// Round half to even:
/// f(2.3) = 2, f(1.5) = 2, f(-1.5) = -2, f(2.5) = 2, f(-2.5) = -2, f(-2.6) = -3
pub fn round_half_to_even(x: f32) -> f32 {
    x.round_ties_even()
}

/// Round half up, `f(x) = floor(x + 0.5)`:
/// f(2.3) = 2, f(1.5) = 2, f(-1.5) = -1, f(2.5) = 3, f(-2.5) = -2, f(-2.6) = -3
pub fn round_half_up(x: f32) -> f32 {
    (x + 0.5).floor()
}

/// Round half away from zero:
/// f(2.3) = 2, f(1.5) = 2, f(-1.5) = -2, f(2.5) = 3, f(-2.5) = -3, f(-2.6) = -3
pub fn round_half_away_from_zero(x: f32) -> f32 {
    x.round()
}
