//! Transport layer for the real-time client
//!
//! The connection manager never touches sockets directly. It asks a
//! [`Connector`] to open a [`Connection`] for each connect attempt, writes
//! text frames to it, and consumes [`TransportEvent`]s from it. The
//! WebSocket implementation lives in [`websocket`]; tests use the in-memory
//! connector from `crate::testing::mocks`.

use thiserror::Error;

pub mod websocket;

/// Close code for a caller-initiated, orderly shutdown
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code reported when the peer vanished without a close frame
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Close code used when the peer sent a close frame without a status
pub const NO_STATUS_RECEIVED: u16 = 1005;

/// Transport-level failures
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to open connection to {url}: {reason}")]
    OpenFailed { url: String, reason: String },
    #[error("Failed to write frame: {0}")]
    SendFailed(String),
    #[error("Failed to close connection: {0}")]
    CloseFailed(String),
    #[error("Connection is closed")]
    Closed,
}

/// Something the transport observed on an open connection
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A text frame from the peer
    Frame(String),
    /// The peer closed the connection
    Closed { code: u16, reason: String },
    /// The connection failed
    Error(String),
}

/// One open, full-duplex connection
///
/// `next_event` must be cancel-safe: the connection manager polls it inside
/// `tokio::select!` and drops the future whenever another branch wins.
#[async_trait::async_trait]
pub trait Connection: Send {
    /// Write one text frame
    async fn send(&mut self, frame: String) -> Result<(), TransportError>;

    /// Wait for the next event; `None` means the stream ended without a close frame
    async fn next_event(&mut self) -> Option<TransportEvent>;

    /// Close the connection with the given code
    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError>;
}

/// Factory that opens a new [`Connection`] per connect attempt
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::OpenFailed {
            url: "ws://localhost".to_string(),
            reason: "refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to open connection to ws://localhost: refused"
        );
    }
}
