//! Error types for cuantizar

use thiserror::Error;

/// Configuration errors raised when a quantizer is assembled from settings
/// that no kernel supports. Shape and axis violations are caller bugs and
/// panic instead.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid bit width {0}: at least 2 bits are required")]
    InvalidBitWidth(u32),

    #[error("Unsupported kernel: {0}")]
    UnsupportedKernel(String),

    #[error("Unsupported position method: {0}")]
    UnsupportedPositionMethod(String),

    #[error("Unsupported update policy: {0}")]
    UnsupportedUpdatePolicy(String),
}

pub type Result<T> = std::result::Result<T, Error>;
