//! Error types shared across the control and media planes.

use thiserror::Error;

/// Errors produced by the transport core.
///
/// Mirrors the error-kind enumeration of the wire protocol: parse failures
/// never close a connection on their own (see [`TransportError::is_fatal`]),
/// while rejection/transport/encode errors do.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Wire parse failed, or the line parsed but is the wrong variant for
    /// the connection's current state.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Host declined a handshake. Terminal for that connection.
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    /// Transport-level failure (I/O error, peer EOF, UDP send/recv error).
    /// Recoverable via auto-retry on the viewer side.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Explicit local cancellation. Terminal, never retried.
    #[error("cancelled")]
    Cancelled,

    /// Lifecycle misuse: started something that is already running.
    #[error("already running")]
    AlreadyRunning,

    /// Lifecycle misuse: stopped/used something that isn't running.
    #[error("not running")]
    NotRunning,

    /// JSON serialization of an outgoing message failed. Terminal for that
    /// connection.
    #[error("encode error: {0}")]
    Encode(String),
}

impl TransportError {
    /// Whether this error should close the owning connection.
    ///
    /// `InvalidMessage` is deliberately excluded: a single malformed line is
    /// resilience noise, not a reason to tear down the connection (§7).
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::InvalidMessage(_))
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::ConnectionFailed(err.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encode(err.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_message_is_not_fatal() {
        assert!(!TransportError::InvalidMessage("bad json".into()).is_fatal());
    }

    #[test]
    fn everything_else_is_fatal() {
        assert!(TransportError::HandshakeRejected("Declined".into()).is_fatal());
        assert!(TransportError::ConnectionFailed("reset".into()).is_fatal());
        assert!(TransportError::Cancelled.is_fatal());
        assert!(TransportError::AlreadyRunning.is_fatal());
        assert!(TransportError::NotRunning.is_fatal());
        assert!(TransportError::Encode("oops".into()).is_fatal());
    }
}
