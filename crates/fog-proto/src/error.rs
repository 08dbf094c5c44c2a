//! Error types for the fog-proto crate.

use thiserror::Error;

/// Errors that can occur while encoding or decoding wire data.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Failed to encode a value.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Failed to decode a value.
    #[error("decoding error: {0}")]
    Decoding(String),

    /// Frame carried an opcode this client does not understand.
    #[error("unknown frame opcode: {0:#04x}")]
    UnknownOpcode(u8),

    /// Frame body shorter than its declared length.
    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes the header announced.
        expected: usize,
        /// Bytes actually present.
        actual: usize,
    },

    /// Missing required field.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// Validation error.
    #[error("validation error: {0}")]
    Validation(String),
}

impl From<serde_json::Error> for ProtoError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decoding(err.to_string())
    }
}
