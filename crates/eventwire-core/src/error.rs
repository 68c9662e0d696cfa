//! Error types for eventwire.
//!
//! Every synchronous operation (`connect`, `send`, `close`, `start`, `stop`)
//! returns a [`WireError`] directly to its caller. Failures inside background
//! loops never reach a caller; they are wrapped into an
//! [`ErrorEvent`](crate::events::ErrorEvent) notification instead.

use thiserror::Error;

/// Main error type for eventwire.
#[derive(Debug, Error)]
pub enum WireError {
    // Rejected before any I/O
    #[error("Invalid target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("Unsupported transport: {transport} does not support {operation}")]
    UnsupportedTransport {
        transport: String,
        operation: String,
    },

    // Lifecycle errors
    #[error("Connection is already established")]
    AlreadyConnected,

    #[error("Server is already running")]
    AlreadyRunning,

    #[error("Not connected")]
    NotConnected,

    #[error("Connection has been closed; create a new one to reconnect")]
    Closed,

    // Framing errors
    #[error("Malformed envelope: {message}")]
    MalformedEnvelope {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Frame of {len} bytes exceeds maximum {max}")]
    FrameTooLarge { len: usize, max: usize },

    // Transport errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Operation was cancelled")]
    Cancelled,
}

/// Result type alias for eventwire operations.
pub type Result<T> = std::result::Result<T, WireError>;

impl From<std::io::Error> for WireError {
    fn from(err: std::io::Error) -> Self {
        WireError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for WireError {
    fn from(err: serde_json::Error) -> Self {
        WireError::MalformedEnvelope {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl WireError {
    /// Create an `InvalidTarget` error.
    pub fn invalid_target(target: impl Into<String>, reason: impl Into<String>) -> Self {
        WireError::InvalidTarget {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Create an `UnsupportedTransport` error.
    pub fn unsupported(transport: impl std::fmt::Display, operation: impl Into<String>) -> Self {
        WireError::UnsupportedTransport {
            transport: transport.to_string(),
            operation: operation.into(),
        }
    }

    /// Whether this error is the outcome of a cancellation request.
    ///
    /// Cancellation is a normal shutdown path and is never logged as a fault.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, WireError::Cancelled)
    }

    /// The underlying `std::io::ErrorKind`, if this is a transport error.
    pub fn io_kind(&self) -> Option<std::io::ErrorKind> {
        match self {
            WireError::Io {
                source: Some(err), ..
            } => Some(err.kind()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WireError::invalid_target("localhost", "expected 'host:port'");
        assert_eq!(
            err.to_string(),
            "Invalid target 'localhost': expected 'host:port'"
        );

        let err = WireError::unsupported("local", "connect_tcp");
        assert_eq!(
            err.to_string(),
            "Unsupported transport: local does not support connect_tcp"
        );
    }

    #[test]
    fn test_io_conversion_keeps_kind() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = WireError::from(io);
        assert_eq!(err.io_kind(), Some(std::io::ErrorKind::ConnectionRefused));
        assert!(!err.is_cancellation());
    }

    #[test]
    fn test_json_conversion_is_malformed_envelope() {
        let json_err = serde_json::from_str::<serde_json::Value>("not-json").unwrap_err();
        let err = WireError::from(json_err);
        assert!(matches!(err, WireError::MalformedEnvelope { .. }));
    }

    #[test]
    fn test_cancelled_is_cancellation() {
        assert!(WireError::Cancelled.is_cancellation());
        assert_eq!(WireError::Cancelled.io_kind(), None);
    }
}
