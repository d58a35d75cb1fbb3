//! Transport error types.

use std::io;

use thiserror::Error;

/// Failures of the remote session: connect, authenticate, channel, transfer.
///
/// Any of these leaves the session marked stale; the next call reconnects.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection parameters are unusable.
    #[error("invalid transport configuration: {0}")]
    Configuration(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("channel failed: {0}")]
    ChannelFailed(String),

    #[error("SSH agent error: {0}")]
    AgentFailed(String),

    /// The peer violated the bulk-transfer protocol or reported an error.
    #[error("transfer protocol error: {0}")]
    Protocol(String),

    /// The session dropped underneath an in-flight call.
    #[error("disconnected")]
    Disconnected,

    /// The transport was closed by its owner.
    #[error("transport closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Create a Protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a ChannelFailed error.
    pub fn channel(msg: impl Into<String>) -> Self {
        Self::ChannelFailed(msg.into())
    }

    /// Returns true if this failure means the session can no longer be used.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_) | Self::ChannelFailed(_) | Self::Disconnected
        )
    }
}

impl From<russh::Error> for TransportError {
    fn from(e: russh::Error) -> Self {
        TransportError::ConnectionFailed(e.to_string())
    }
}

/// Transport result type.
pub type TransportResult<T> = Result<T, TransportError>;
