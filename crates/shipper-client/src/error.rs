//! Error types for the shipper client.

use shipper_protocol::{ErrorReply, ProtocolError};
use thiserror::Error;

/// Shipper client error type.
#[derive(Error, Debug)]
pub enum ShipperError {
    /// Connectivity, timeout, or serialization fault. Always retry-eligible.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Contract violation by the peer. Never retried.
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// Retry or time budget consumed before the batch was fully accepted.
    ///
    /// `offset` is the number of events already accepted; a caller resuming
    /// the batch must start from there.
    #[error("Retries exhausted at offset {offset} after {attempts} attempts: {last_error}")]
    Exhausted {
        offset: usize,
        attempts: u32,
        last_error: String,
    },

    /// Caller-initiated stop. Not a failure of the endpoint.
    #[error("Cancelled at offset {offset}")]
    Cancelled { offset: usize },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ShipperError {
    /// Whether the reconciler or checkpoint consumer may try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ShipperError::Transport(_))
    }
}

impl From<std::io::Error> for ShipperError {
    fn from(err: std::io::Error) -> Self {
        ShipperError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for ShipperError {
    fn from(err: serde_json::Error) -> Self {
        ShipperError::Transport(format!("serialization failed: {}", err))
    }
}

impl From<ProtocolError> for ShipperError {
    fn from(err: ProtocolError) -> Self {
        match err {
            // No retry can shrink a frame.
            ProtocolError::FrameTooLarge(_) => ShipperError::Protocol(err.to_string()),
            // Undecodable bytes are a serialization fault on the channel.
            _ => ShipperError::Transport(err.to_string()),
        }
    }
}

impl From<ErrorReply> for ShipperError {
    fn from(reply: ErrorReply) -> Self {
        if reply.code.is_transient() {
            ShipperError::Transport(format!("shipper unavailable: {}", reply.message))
        } else {
            ShipperError::Protocol(format!("shipper rejected call ({:?}): {}", reply.code, reply.message))
        }
    }
}

/// Result type alias using ShipperError.
pub type ShipperResult<T> = Result<T, ShipperError>;

#[cfg(test)]
mod tests {
    use super::*;
    use shipper_protocol::ErrorCode;

    #[test]
    fn only_transport_errors_are_retryable() {
        assert!(ShipperError::Transport("reset".into()).is_retryable());
        assert!(!ShipperError::Protocol("bad count".into()).is_retryable());
        assert!(!ShipperError::Cancelled { offset: 0 }.is_retryable());
        assert!(!ShipperError::Exhausted {
            offset: 1,
            attempts: 2,
            last_error: "x".into()
        }
        .is_retryable());
    }

    #[test]
    fn codec_failures_map_to_transport() {
        let err: ShipperError = ProtocolError::UnknownFrameType(0x42).into();
        assert!(matches!(err, ShipperError::Transport(_)));
    }

    #[test]
    fn oversized_frames_are_not_retryable() {
        let err: ShipperError = ProtocolError::FrameTooLarge(usize::MAX).into();
        assert!(matches!(err, ShipperError::Protocol(_)));
    }

    #[test]
    fn json_failures_map_to_transport() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: ShipperError = json_err.into();
        assert!(err.is_retryable());
    }

    #[test]
    fn error_replies_split_on_transience() {
        let unavailable: ShipperError = ErrorReply::new(ErrorCode::Unavailable, "busy").into();
        assert!(unavailable.is_retryable());

        let unimplemented: ShipperError =
            ErrorReply::new(ErrorCode::Unimplemented, "no such method").into();
        assert!(matches!(unimplemented, ShipperError::Protocol(_)));
    }
}
