//! Client error types.

use tabula_codec::CodecError;
use tabula_compress::CompressionError;
use tabula_directory::DirectoryError;
use tabula_types::UnsupportedVersion;
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur while dispatching requests.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Every stream id of the connection is in use.
    #[error("connection saturated: no free stream id")]
    Saturated,

    /// The connection went away before a response arrived.
    #[error("connection closed")]
    Closed,

    /// No response arrived within the request timeout.
    #[error("request timed out on stream {stream}")]
    Timeout { stream: i16 },

    /// I/O error on the transport.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame or message body could not be parsed.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A frame body exceeded the configured limit.
    #[error("frame body of {size} bytes exceeds limit of {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error(transparent)]
    UnsupportedVersion(#[from] UnsupportedVersion),

    /// Server returned an ERROR response.
    #[error("server error ({code:#06x}): {message}")]
    Server { code: i32, message: String },

    /// The server answered with an opcode the request does not expect.
    #[error("unexpected response: expected {expected}, got {actual}")]
    UnexpectedResponse { expected: String, actual: String },

    /// Routing found no connected host.
    #[error("no host available")]
    NoHostAvailable,

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Compression(#[from] CompressionError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

impl ClientError {
    pub(crate) fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol(reason.into())
    }

    pub(crate) fn server(code: i32, message: impl Into<String>) -> Self {
        Self::Server {
            code,
            message: message.into(),
        }
    }

    /// Returns true for errors after which the connection is unusable.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Self::Closed | Self::Io(_) | Self::Protocol(_) | Self::FrameTooLarge { .. }
        )
    }
}
