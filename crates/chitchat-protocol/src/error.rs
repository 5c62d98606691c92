//! Protocol error type.

use thiserror::Error;

/// Errors raised while framing or encoding values.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The payload contains the delimiter byte and could not be framed back.
    #[error("payload contains the frame delimiter {0:#04x}")]
    DelimiterInPayload(u8),

    #[error("failed to serialize value: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether this error came from the underlying stream rather than the payload.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
