//! Error types for extension negotiation and processing-chain management.
//!
//! Declined offers, reserved-bit conflicts and an empty negotiation result are
//! routine outcomes and never show up here.

use thiserror::Error;

/// Result type alias for negotiation operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while negotiating or running extensions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Malformed `Sec-WebSocket-Extensions` value or extension configuration.
    #[error("Invalid extension: {0}")]
    InvalidExtension(String),

    /// An installed transform failed while processing a frame.
    #[error("Extension error: {0}")]
    Extension(String),

    /// Invalid WebSocket upgrade request or response.
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    /// A header value that cannot be written on the wire.
    #[error("Invalid value for header {header}: {reason}")]
    InvalidHeaderValue {
        /// Header name.
        header: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// Handshake data exceeds the configured maximum.
    #[error("Handshake too large: {size} bytes (max: {max})")]
    HandshakeTooLarge {
        /// Actual handshake size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Message size exceeds configured maximum.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Actual message size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),

    /// Operation not allowed in the negotiator's current phase.
    #[error("Invalid negotiation state: {operation} not allowed while {phase}")]
    InvalidState {
        /// Attempted operation.
        operation: &'static str,
        /// Phase the negotiator was in.
        phase: String,
    },

    /// A pipeline stage with this name already exists.
    #[error("Duplicate pipeline stage: {0}")]
    DuplicateStage(String),

    /// No pipeline stage with this name exists.
    #[error("Pipeline stage not found: {0}")]
    StageNotFound(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::MessageTooLarge {
            size: 70_000_000,
            max: 67_108_864,
        };
        assert_eq!(
            err.to_string(),
            "Message too large: 70000000 bytes (max: 67108864)"
        );

        let err = Error::InvalidState {
            operation: "handle_request",
            phase: "Detached".into(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid negotiation state: handle_request not allowed while Detached"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(msg) if msg.contains("pipe broken")));
    }

    #[test]
    fn test_error_clone() {
        let err = Error::StageNotFound("ws-extensions".into());
        assert_eq!(err.clone(), err);
    }
}
