//! Codec error types.

use std::fmt::Display;

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while translating values to or from wire bytes.
///
/// A codec never panics on malformed input; every failure surfaces as one
/// of these variants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// A numeric value does not fit the destination width.
    #[error("value {value} out of range for {target}")]
    OutOfRange { value: String, target: String },

    /// The wire bytes are not a valid encoding of the type.
    #[error("malformed {cql} data: {reason}")]
    MalformedData { cql: String, reason: String },

    /// Decoding ran past the end of the input.
    #[error("truncated {cql} data: needed {needed} bytes, {available} available")]
    TruncatedData {
        cql: String,
        needed: usize,
        available: usize,
    },

    /// No conversion exists between the host type and the CQL type.
    #[error("can not convert between {host} and {cql}")]
    UnsupportedType { host: String, cql: String },

    /// The output slot can not hold a decoded value.
    #[error("can not decode {cql} into {host}")]
    NilTarget { host: String, cql: String },
}

impl CodecError {
    pub fn out_of_range(value: impl Display, target: impl Display) -> Self {
        Self::OutOfRange {
            value: value.to_string(),
            target: target.to_string(),
        }
    }

    pub fn malformed(cql: impl Display, reason: impl Into<String>) -> Self {
        Self::MalformedData {
            cql: cql.to_string(),
            reason: reason.into(),
        }
    }

    pub fn truncated(cql: impl Display, needed: usize, available: usize) -> Self {
        Self::TruncatedData {
            cql: cql.to_string(),
            needed,
            available,
        }
    }

    pub fn unsupported(host: impl Display, cql: impl Display) -> Self {
        Self::UnsupportedType {
            host: host.to_string(),
            cql: cql.to_string(),
        }
    }

    pub fn nil_target(host: impl Display, cql: impl Display) -> Self {
        Self::NilTarget {
            host: host.to_string(),
            cql: cql.to_string(),
        }
    }

    /// Returns true for errors caused by the input bytes rather than the
    /// caller's types.
    pub fn is_decode_failure(&self) -> bool {
        matches!(
            self,
            Self::MalformedData { .. } | Self::TruncatedData { .. }
        )
    }
}
