//! Error types for the real-time connection client
//!
//! Every failure the client can surface to callers is a [`ClientError`].
//! Transport, codec and configuration failures have their own enums so the
//! lower layers stay independent of the client.

use crate::client::state::ConnectionStatus;
use crate::config::ConfigError;
use crate::protocol::codec::CodecError;
use crate::transport::TransportError;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Main error type for client operations
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("WebSocket is not connected (status: {status})")]
    NotConnected { status: ConnectionStatus },

    #[error("Client has been destroyed")]
    Destroyed,

    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectTimeout { timeout_ms: u64 },

    #[error("{0}")]
    AuthRejected(String),

    #[error("Invalid authentication response")]
    InvalidAuthResponse,

    #[error("Connection attempt aborted: {0}")]
    Aborted(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Payload must be a JSON object")]
    InvalidPayload,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Connection driver stopped unexpectedly")]
    DriverStopped,
}

impl ClientError {
    /// Create an aborted-attempt error
    pub fn aborted<S: Into<String>>(message: S) -> Self {
        Self::Aborted(message.into())
    }

    /// Whether the automatic reconnection policy applies to this failure
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::ConnectTimeout { .. }
                | ClientError::AuthRejected(_)
                | ClientError::InvalidAuthResponse
                | ClientError::ConnectionFailed(_)
                | ClientError::Transport(_)
        )
    }
}

/// Result alias used throughout the crate
pub type ClientResult<T> = Result<T, ClientError>;

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret)([=:]\s*)[^\s&]+").expect("static regex is valid")
});

/// Redact credential-looking fragments before a message reaches the logs
///
/// Server error strings and endpoint URLs may carry query-string tokens.
pub fn redact_secrets(message: &str) -> String {
    SECRET_PATTERN
        .replace_all(message, "${1}${2}***")
        .into_owned()
}
