//! Quantizer configuration
//!
//! A [`QuantConfig`] fully determines one fake-quantization setup: bit width,
//! rounding rule, symmetry, granularity, how power-of-two positions are
//! searched, and how range state is updated across batches. Kernels never
//! guess a fallback: a combination outside the supported matrix is rejected
//! with a configuration error at call time.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::round::RoundMode;

/// Strategy for choosing the power-of-two quantize position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PositionMethod {
    /// Smallest scale that keeps the calibrated range free of overflow
    #[default]
    NonOverflow,
    /// Sweep positions above non-overflow and keep the one with the least
    /// squared reconstruction error
    MinDiffs,
}

/// How range state absorbs a new batch statistic.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Default)]
pub enum UpdatePolicy {
    /// Overwrite with the latest batch value
    #[default]
    LastValue,
    /// Exponential moving average over batches
    MovingAverage { decay: f32 },
}

impl UpdatePolicy {
    /// Moving average with the conventional 0.999 decay.
    pub fn moving_average() -> Self {
        UpdatePolicy::MovingAverage { decay: 0.999 }
    }
}

/// Fake quantization configuration
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuantConfig {
    /// Number of bits of the integer grid (at least 2)
    pub bit_width: u32,
    /// Tie-breaking rule for the quantize rounding step
    pub round_mode: RoundMode,
    /// Whether the grid is centered at zero (no zero-point shift)
    pub symmetry: bool,
    /// Whether scales are tracked per channel instead of per tensor
    pub per_channel: bool,
    /// Channel axis for per-channel mode; negative counts from the back
    pub channel_axis: isize,
    /// How power-of-two positions are searched
    pub position_method: PositionMethod,
    /// Drop the lowest code so the grid is symmetric around zero
    pub narrow_range: bool,
    /// How range state absorbs batch statistics
    pub update_policy: UpdatePolicy,
}

impl QuantConfig {
    /// Symmetric per-tensor quantizer with half-to-even rounding.
    pub fn new(bit_width: u32) -> Self {
        Self {
            bit_width,
            round_mode: RoundMode::HalfToEven,
            symmetry: true,
            per_channel: false,
            channel_axis: -1,
            position_method: PositionMethod::NonOverflow,
            narrow_range: false,
            update_policy: UpdatePolicy::LastValue,
        }
    }

    /// 8-bit symmetric quantizer, the common default.
    pub fn int8() -> Self {
        Self::new(8)
    }

    /// Switch to asymmetric quantization (zero-point shift).
    pub fn asymmetric(mut self) -> Self {
        self.symmetry = false;
        self
    }

    /// Track scales per channel along `axis` (negative counts from the back).
    pub fn per_channel(mut self, axis: isize) -> Self {
        self.per_channel = true;
        self.channel_axis = axis;
        self
    }

    /// Drop the lowest code so the integer grid is symmetric around zero.
    pub fn narrow_range(mut self) -> Self {
        self.narrow_range = true;
        self
    }

    pub fn with_round_mode(mut self, round_mode: RoundMode) -> Self {
        self.round_mode = round_mode;
        self
    }

    pub fn with_position_method(mut self, method: PositionMethod) -> Self {
        self.position_method = method;
        self
    }

    pub fn with_update_policy(mut self, policy: UpdatePolicy) -> Self {
        self.update_policy = policy;
        self
    }

    /// Integer grid bounds `(q_min, q_max)`.
    ///
    /// `q_min = -2^(bit_width-1)`, raised by one in narrow-range mode;
    /// `q_max = 2^(bit_width-1) - 1`.
    pub fn q_bounds(&self) -> (f32, f32) {
        let bound = 2.0f32.powi(self.bit_width as i32 - 1);
        let q_min = if self.narrow_range { -bound + 1.0 } else { -bound };
        (q_min, bound - 1.0)
    }

    /// Reject bit widths too small to form a grid.
    pub fn validate(&self) -> Result<()> {
        if self.bit_width < 2 {
            return Err(Error::InvalidBitWidth(self.bit_width));
        }
        Ok(())
    }
}

impl Default for QuantConfig {
    fn default() -> Self {
        Self::int8()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_q_bounds_int8() {
        let cfg = QuantConfig::int8();
        assert_eq!(cfg.q_bounds(), (-128.0, 127.0));

        let narrow = QuantConfig::int8().narrow_range();
        assert_eq!(narrow.q_bounds(), (-127.0, 127.0));
    }

    #[test]
    fn test_q_bounds_low_widths() {
        assert_eq!(QuantConfig::new(4).q_bounds(), (-8.0, 7.0));
        assert_eq!(QuantConfig::new(2).q_bounds(), (-2.0, 1.0));
        assert_eq!(QuantConfig::new(16).q_bounds(), (-32768.0, 32767.0));
    }

    #[test]
    fn test_validate_rejects_tiny_widths() {
        assert!(matches!(
            QuantConfig::new(1).validate(),
            Err(Error::InvalidBitWidth(1))
        ));
        assert!(QuantConfig::new(2).validate().is_ok());
    }

    #[test]
    fn test_builder_chain() {
        let cfg = QuantConfig::new(4)
            .asymmetric()
            .per_channel(0)
            .with_round_mode(RoundMode::HalfUp)
            .with_position_method(PositionMethod::MinDiffs)
            .with_update_policy(UpdatePolicy::moving_average());

        assert_eq!(cfg.bit_width, 4);
        assert!(!cfg.symmetry);
        assert!(cfg.per_channel);
        assert_eq!(cfg.channel_axis, 0);
        assert_eq!(cfg.round_mode, RoundMode::HalfUp);
        assert_eq!(cfg.position_method, PositionMethod::MinDiffs);
        assert_eq!(
            cfg.update_policy,
            UpdatePolicy::MovingAverage { decay: 0.999 }
        );
    }

    #[test]
    fn test_config_serde_round_trip() {
        let cfg = QuantConfig::int8().asymmetric().per_channel(-1);
        let json = serde_json::to_string(&cfg).unwrap();
        let back: QuantConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }
}
