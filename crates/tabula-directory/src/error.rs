//! Errors raised while maintaining the routing table.

use tabula_codec::CodecError;
use tabula_types::Token;

/// Result type for routing table operations.
pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// Errors that can occur while building or updating tablets.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// A tablet's range is empty or inverted.
    #[error("invalid tablet range ({first}, {last}]")]
    InvalidRange { first: Token, last: Token },

    /// A bulk insert block is not sorted and non-overlapping.
    #[error("tablet batch out of order at index {index}")]
    UnsortedBatch { index: usize },

    /// A replica carried a shard id that is not a non-negative integer.
    #[error("invalid shard id {0}")]
    InvalidShard(i32),

    /// The routing payload could not be decoded.
    #[error("tablet payload: {0}")]
    Payload(#[from] CodecError),
}
