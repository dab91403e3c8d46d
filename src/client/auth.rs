//! Post-open handshake
//!
//! The authenticator builds the single handshake frame and judges the first
//! reply. It does not touch connection state; it hands an [`AuthOutcome`]
//! or a [`ClientError`] back to the connection manager.

use super::state::AuthOutcome;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::protocol::codec::{decode_frame, encode_handshake, InboundFrame};
use crate::protocol::HandshakeFrame;
use tracing::{debug, warn};

/// Reason used when the server rejects without saying why
pub const DEFAULT_REJECTION: &str = "Authentication failed";

#[derive(Debug, Clone)]
pub struct Authenticator {
    token: String,
    session_id: Option<String>,
    channels: Vec<String>,
}

impl Authenticator {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            token: config.token.clone(),
            session_id: config.session_id.clone(),
            channels: config.channels.clone(),
        }
    }

    pub fn handshake(&self) -> HandshakeFrame {
        HandshakeFrame {
            token: self.token.clone(),
            session_id: self.session_id.clone(),
            channels: (!self.channels.is_empty()).then(|| self.channels.clone()),
        }
    }

    pub fn handshake_frame(&self) -> ClientResult<String> {
        Ok(encode_handshake(&self.handshake())?)
    }

    /// Judge the first frame received after the handshake was sent
    pub fn evaluate(&self, frame: &str) -> ClientResult<AuthOutcome> {
        let response = match decode_frame(frame) {
            Ok(InboundFrame::Auth(response)) => response,
            Ok(InboundFrame::Event(event)) => {
                debug!(event_type = %event.event_type, "Event received before authentication");
                return Err(ClientError::InvalidAuthResponse);
            }
            Err(e) => {
                debug!("Unparseable authentication response: {}", e);
                return Err(ClientError::InvalidAuthResponse);
            }
        };

        if !response.success {
            let reason = response
                .error
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| DEFAULT_REJECTION.to_string());
            return Err(ClientError::AuthRejected(reason));
        }
        if response.connection_id.is_empty() {
            warn!("Authentication succeeded without a connection id");
            return Err(ClientError::InvalidAuthResponse);
        }

        Ok(AuthOutcome {
            connection_id: response.connection_id,
            user_id: response.user_id,
            session_id: response.session_id,
            available_channels: response.available_channels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn authenticator() -> Authenticator {
        Authenticator::from_config(&ClientConfig::test_config())
    }

    #[test]
    fn test_handshake_carries_token_only_by_default() {
        let frame: serde_json::Value =
            serde_json::from_str(&authenticator().handshake_frame().unwrap()).unwrap();
        assert_eq!(frame, json!({"token": "test-token"}));
    }

    #[test]
    fn test_handshake_carries_session_and_channels() {
        let config = ClientConfig::test_config()
            .with_session_id("s1")
            .with_channels(["trip-7"]);
        let frame: serde_json::Value =
            serde_json::from_str(&Authenticator::from_config(&config).handshake_frame().unwrap())
                .unwrap();
        assert_eq!(
            frame,
            json!({"token": "test-token", "session_id": "s1", "channels": ["trip-7"]})
        );
    }

    #[test]
    fn test_success_extracts_identifiers() {
        let outcome = authenticator()
            .evaluate(
                r#"{"success":true,"connection_id":"c1","user_id":"u1","session_id":"s1","available_channels":["chat"]}"#,
            )
            .unwrap();
        assert_eq!(outcome.connection_id, "c1");
        assert_eq!(outcome.user_id.as_deref(), Some("u1"));
        assert_eq!(outcome.session_id.as_deref(), Some("s1"));
        assert_eq!(outcome.available_channels, vec!["chat"]);
    }

    #[test]
    fn test_rejection_uses_server_error() {
        let err = authenticator()
            .evaluate(r#"{"success":false,"error":"Invalid token"}"#)
            .unwrap_err();
        assert!(matches!(err, ClientError::AuthRejected(ref m) if m == "Invalid token"));
    }

    #[test]
    fn test_rejection_without_reason_uses_default() {
        let err = authenticator().evaluate(r#"{"success":false}"#).unwrap_err();
        assert!(matches!(err, ClientError::AuthRejected(ref m) if m == DEFAULT_REJECTION));
    }

    #[test]
    fn test_success_without_connection_id_is_invalid() {
        assert!(matches!(
            authenticator().evaluate(r#"{"success":true}"#),
            Err(ClientError::InvalidAuthResponse)
        ));
        assert!(matches!(
            authenticator().evaluate(r#"{"success":true,"connection_id":""}"#),
            Err(ClientError::InvalidAuthResponse)
        ));
    }

    #[test]
    fn test_event_before_auth_is_invalid() {
        let err = authenticator()
            .evaluate(r#"{"id":"e1","type":"notification","timestamp":"2026-01-01T00:00:00Z","payload":{}}"#)
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidAuthResponse));
    }

    #[test]
    fn test_garbage_is_invalid() {
        assert!(matches!(
            authenticator().evaluate("not json"),
            Err(ClientError::InvalidAuthResponse)
        ));
        assert!(matches!(
            authenticator().evaluate(r#"{"connection_id":"c1"}"#),
            Err(ClientError::InvalidAuthResponse)
        ));
    }
}
