//! Transport Traits
//!
//! Core trait definitions for the client-to-server link.
//!
//! Two traits separate "how to open a connection" from "what a live
//! connection can do":
//! - `Connector`: opens one physical connection to an endpoint
//! - `Connection`: one live, message-oriented connection
//!
//! The reconnecting [`Transport`](super::Transport) is written against these
//! traits only, so tests drive it with an in-memory connector.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Coarse connectivity status
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    /// Opening a connection (or waiting to retry)
    #[default]
    Connecting,
    /// Connection is live; `send` delivers
    Open,
    /// No live connection
    Closed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "CONNECTING",
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}

/// How a connection ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseKind {
    /// Orderly close handshake with a normal close code
    Clean,
    /// Dropped, errored, or closed with an abnormal code
    Unclean,
}

/// Something that happened on a live connection
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WireEvent {
    /// A text frame arrived
    Text(String),
    /// The connection ended
    Closed(CloseKind),
}

/// Errors that can occur during transport operations
#[derive(Debug)]
pub enum TransportError {
    /// Connection to the server failed
    ConnectionFailed(String),
    /// Connection attempt exceeded the connect timeout
    Timeout(u64),
    /// Failed to send a frame
    SendFailed(String),
    /// Frame serialization error
    SerializationError(String),
    /// Transport not in expected state
    InvalidState(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed(msg) => write!(f, "Connection failed: {msg}"),
            Self::Timeout(ms) => write!(f, "Connection timed out after {ms}ms"),
            Self::SendFailed(msg) => write!(f, "Send failed: {msg}"),
            Self::SerializationError(msg) => write!(f, "Serialization error: {msg}"),
            Self::InvalidState(msg) => write!(f, "Invalid state: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// One live, message-oriented connection
#[async_trait]
pub trait Connection: Send {
    /// Wait for the next frame or the end of the connection
    ///
    /// Errors on the underlying stream are reported as
    /// `WireEvent::Closed(CloseKind::Unclean)`; once `Closed` is returned the
    /// connection is finished.
    async fn recv(&mut self) -> WireEvent;

    /// Send a text frame
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Close with a normal close code
    async fn close(&mut self);
}

/// Opens connections to an endpoint
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open one connection
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::ConnectionFailed("refused".to_string());
        assert!(err.to_string().contains("Connection failed"));

        let err = TransportError::Timeout(5000);
        assert_eq!(err.to_string(), "Connection timed out after 5000ms");

        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = TransportError::from(json_err);
        assert!(err.to_string().starts_with("Serialization error"));
    }

    #[test]
    fn test_connection_status_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&ConnectionStatus::Open).unwrap(),
            r#""OPEN""#
        );
        assert_eq!(ConnectionStatus::default(), ConnectionStatus::Connecting);
    }
}
