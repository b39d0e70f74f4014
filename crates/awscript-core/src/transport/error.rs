//! Error types for the transport boundary.

use thiserror::Error;

/// Errors produced by a [`Transport`](crate::transport::Transport).
///
/// `operation` names the call and its target, e.g. `set_route npc1`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The remote side answered, but refused the call.
    #[error("{operation} rejected: {message}")]
    Rejected { operation: String, message: String },

    /// No acknowledgment arrived in time.
    #[error("{operation} not acknowledged within {timeout_ms} ms")]
    NoAck { operation: String, timeout_ms: u64 },

    /// The connection to the bridge is gone.
    #[error("transport disconnected")]
    Disconnected,

    #[error("transport I/O error: {0}")]
    Io(String),

    /// A frame could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Whether the error leaves the transport unusable for later scenarios.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Disconnected)
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Protocol(err.to_string())
    }
}

/// Convenience result alias.
pub type TransportResult<T> = std::result::Result<T, TransportError>;
