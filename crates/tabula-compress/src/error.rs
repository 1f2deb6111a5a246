//! Error types for value compression.

use thiserror::Error;

/// Result type for compression operations.
pub type CompressionResult<T> = Result<T, CompressionError>;

/// Errors raised while building or opening a compression envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompressionError {
    #[error("{codec} compression failed: {reason}")]
    CompressionFailed { codec: &'static str, reason: String },

    #[error("{codec} decompression failed: {reason}")]
    DecompressionFailed { codec: &'static str, reason: String },

    #[error("envelope truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("uncompressed length {declared} exceeds limit {limit}")]
    TooLarge { declared: usize, limit: usize },

    #[error("compression prefix must not be empty")]
    EmptyPrefix,

    #[error("byte {byte:#04x} at offset {offset} is outside the 7-bit channel")]
    NotAscii { offset: usize, byte: u8 },
}
