//! Codec error types.

use thiserror::Error;

/// Errors raised while encoding or decoding frames.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Frame body shorter than the fixed header
    #[error("Frame too short: {got} bytes, need at least {need}")]
    FrameTooShort { got: usize, need: usize },

    /// Declared frame length exceeds the allowed maximum
    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// Frame type byte not known to this protocol version
    #[error("Unknown frame type: {0:#04x}")]
    UnknownFrameType(u8),

    /// Frame decoded fine but carries a different message than expected
    #[error("Expected {expected} frame, got {got}")]
    UnexpectedFrameType {
        expected: &'static str,
        got: &'static str,
    },

    /// JSON body could not be (de)serialized
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using ProtocolError.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
