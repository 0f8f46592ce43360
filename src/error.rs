//! Error types for the relay

use crate::server::ConnectionId;
use std::time::Duration;
use thiserror::Error;

/// Failure reading the next inbound frame from a stream
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecvError {
    /// The remote peer closed the stream (close frame or end of stream)
    #[error("Remote peer closed the stream")]
    RemoteClosed,

    /// The transport failed while reading
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Failure writing to, or closing, the underlying stream
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Transport error: {0}")]
pub struct TransportError(pub String);

/// Failure delivering a frame into a recipient's outbound queue
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The recipient is closing or its writer has gone away
    #[error("Connection closed")]
    Closed,

    /// The recipient's queue stayed full for longer than the send timeout
    #[error("Send timed out after {0:?}")]
    Timeout(Duration),
}

/// Connection registry consistency errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A connection with this id is already registered
    #[error("Connection {0} is already registered")]
    AlreadyRegistered(ConnectionId),
}

/// Invalid relay configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("WebSocket path must start with '/': {0}")]
    InvalidPath(String),

    #[error("Outbound buffer must hold at least one frame")]
    ZeroOutboundBuffer,

    #[error("Send timeout must be greater than zero")]
    ZeroSendTimeout,

    #[error("Maximum message size must be greater than zero")]
    ZeroMessageSize,

    #[error("Static directory does not exist: {0}")]
    MissingStaticDir(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_recv() {
        assert_eq!(RecvError::RemoteClosed.to_string(), "Remote peer closed the stream");
        assert_eq!(
            RecvError::Transport("reset by peer".to_string()).to_string(),
            "Transport error: reset by peer"
        );
    }

    #[test]
    fn test_error_display_send() {
        assert_eq!(SendError::Closed.to_string(), "Connection closed");
        assert_eq!(
            SendError::Timeout(Duration::from_millis(250)).to_string(),
            "Send timed out after 250ms"
        );
    }

    #[test]
    fn test_error_display_registry() {
        let id = ConnectionId::new();
        let err = RegistryError::AlreadyRegistered(id);
        assert_eq!(err.to_string(), format!("Connection {} is already registered", id));
    }

    #[test]
    fn test_error_display_config() {
        let err = ConfigError::InvalidPath("ws".to_string());
        assert_eq!(err.to_string(), "WebSocket path must start with '/': ws");
        assert_eq!(
            ConfigError::ZeroOutboundBuffer.to_string(),
            "Outbound buffer must hold at least one frame"
        );
    }
}
