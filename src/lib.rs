//! # Cuantizar: Fake-Quantization Arithmetic Core
//!
//! Cuantizar implements the arithmetic of fake quantization for
//! quantization-aware training and calibration: deterministic rounding,
//! symmetric and asymmetric quantize/dequantize kernels with float or
//! power-of-two scales, range estimation, parameter searches, and the mode
//! state machine that decides when statistics move and when they freeze.
//!
//! ## Architecture
//!
//! - **round**: Tie-breaking rounding strategies
//! - **range**: Batch min/max statistics and float scales
//! - **zero_point**: Asymmetric zero-point solving and range adjustment
//! - **kernel**: Forward kernels with straight-through gradients
//! - **search**: Power-of-two position and log-threshold searches
//! - **state**: Persistent calibration state behind a storage trait
//! - **controller**: Mode-driven quantization ops
//! - **config**: Quantizer configuration
//!
//! Forward quantization happens entirely in float, so outputs match what
//! integer hardware would produce while gradients still flow.

pub mod config;
pub mod controller;
pub mod kernel;
pub mod range;
pub mod round;
pub mod search;
pub mod state;
pub mod zero_point;

pub mod error;

// Re-export commonly used types
pub use config::{PositionMethod, QuantConfig, UpdatePolicy};
pub use controller::{quantize_min_max, quantize_with_log_threshold, quantize_with_position, Mode};
pub use error::{Error, Result};
pub use kernel::{FakeQuantOp, QuantBackwardOp};
pub use round::RoundMode;
pub use state::{InMemoryState, MutableState, RangeState};
