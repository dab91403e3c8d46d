//! Connection state and its transitions
//!
//! [`ConnectionState`] is never edited field by field. Every change is
//! expressed as a [`StateEvent`] and applied with [`ConnectionState::apply`],
//! which returns a whole new record. The connection manager is the only
//! caller; everyone else reads published snapshots.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tracing::{error, info, warn};

/// Connection status tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            ConnectionStatus::Disconnected => "DISCONNECTED",
            ConnectionStatus::Connecting => "CONNECTING",
            ConnectionStatus::Connected => "CONNECTED",
            ConnectionStatus::Reconnecting => "RECONNECTING",
            ConnectionStatus::Error => "ERROR",
        };
        f.write_str(tag)
    }
}

/// Snapshot of the connection
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub connection_id: Option<String>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub reconnect_attempt: u32,
    pub error: Option<String>,
}

/// Identifiers the server assigned during the handshake
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthOutcome {
    pub connection_id: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub available_channels: Vec<String>,
}

/// Inputs that drive the state machine
#[derive(Debug, Clone)]
pub enum StateEvent {
    /// A connect attempt began; manual attempts from a settled state clear the retry counter
    AttemptStarted { reset_attempts: bool },
    /// The handshake succeeded
    Authenticated { outcome: AuthOutcome, at: DateTime<Utc> },
    /// The attempt or the live connection failed; `retry` carries the scheduled attempt number
    Failed { reason: String, retry: Option<u32> },
    /// The peer closed the connection cleanly
    ClosedByPeer,
    /// The caller disconnected
    ClosedByClient,
    /// The server acknowledged a heartbeat
    HeartbeatAcknowledged { at: DateTime<Utc> },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    /// Compute the state that follows `event` (pure function)
    pub fn apply(&self, event: StateEvent) -> ConnectionState {
        match event {
            StateEvent::AttemptStarted { reset_attempts } => ConnectionState {
                status: ConnectionStatus::Connecting,
                reconnect_attempt: if reset_attempts {
                    0
                } else {
                    self.reconnect_attempt
                },
                error: self.error.clone(),
                session_id: self.session_id.clone(),
                ..ConnectionState::default()
            },
            StateEvent::Authenticated { outcome, at } => ConnectionState {
                status: ConnectionStatus::Connected,
                connection_id: Some(outcome.connection_id),
                user_id: outcome.user_id,
                session_id: outcome.session_id.or_else(|| self.session_id.clone()),
                connected_at: Some(at),
                last_heartbeat: None,
                reconnect_attempt: 0,
                error: None,
            },
            StateEvent::Failed { reason, retry } => ConnectionState {
                status: match retry {
                    Some(_) => ConnectionStatus::Reconnecting,
                    None => ConnectionStatus::Error,
                },
                reconnect_attempt: retry.unwrap_or(self.reconnect_attempt),
                error: Some(reason),
                session_id: self.session_id.clone(),
                ..ConnectionState::default()
            },
            StateEvent::ClosedByPeer | StateEvent::ClosedByClient => ConnectionState {
                status: ConnectionStatus::Disconnected,
                session_id: self.session_id.clone(),
                ..ConnectionState::default()
            },
            StateEvent::HeartbeatAcknowledged { at } => ConnectionState {
                last_heartbeat: Some(at),
                ..self.clone()
            },
        }
    }
}

/// Log a status change (pure logging function)
pub fn log_state_transition(from: &ConnectionState, to: &ConnectionState) {
    if from.status == to.status && from.reconnect_attempt == to.reconnect_attempt {
        return;
    }
    match (from.status, to.status) {
        (_, ConnectionStatus::Connected) => {
            info!(
                connection_id = to.connection_id.as_deref().unwrap_or_default(),
                "Real-time connection established"
            );
        }
        (ConnectionStatus::Connected, ConnectionStatus::Reconnecting) => {
            warn!(
                attempt = to.reconnect_attempt,
                "Connection lost: {}",
                to.error.as_deref().unwrap_or("unknown")
            );
        }
        (_, ConnectionStatus::Reconnecting) => {
            info!(attempt = to.reconnect_attempt, "Reconnection scheduled");
        }
        (_, ConnectionStatus::Error) => {
            error!(
                "Connection failed: {}",
                to.error.as_deref().unwrap_or("unknown")
            );
        }
        _ => {
            info!("Connection state: {} -> {}", from.status, to.status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(id: &str) -> AuthOutcome {
        AuthOutcome {
            connection_id: id.to_string(),
            user_id: Some("u1".to_string()),
            session_id: None,
            available_channels: vec![],
        }
    }

    #[test]
    fn test_initial_state_is_disconnected() {
        let state = ConnectionState::default();
        assert_eq!(state.status, ConnectionStatus::Disconnected);
        assert_eq!(state.reconnect_attempt, 0);
        assert!(state.connection_id.is_none());
    }

    #[test]
    fn test_status_display_uses_wire_tags() {
        assert_eq!(ConnectionStatus::Reconnecting.to_string(), "RECONNECTING");
        assert_eq!(
            serde_json::to_value(ConnectionStatus::Connected).unwrap(),
            serde_json::json!("CONNECTED")
        );
    }

    #[test]
    fn test_authentication_resets_attempt_counter() {
        let retrying = ConnectionState::default().apply(StateEvent::Failed {
            reason: "boom".to_string(),
            retry: Some(3),
        });
        assert_eq!(retrying.reconnect_attempt, 3);

        let connecting = retrying.apply(StateEvent::AttemptStarted {
            reset_attempts: false,
        });
        assert_eq!(connecting.status, ConnectionStatus::Connecting);
        assert_eq!(connecting.reconnect_attempt, 3);

        let connected = connecting.apply(StateEvent::Authenticated {
            outcome: outcome("c9"),
            at: Utc::now(),
        });
        assert_eq!(connected.status, ConnectionStatus::Connected);
        assert_eq!(connected.reconnect_attempt, 0);
        assert_eq!(connected.connection_id.as_deref(), Some("c9"));
        assert!(connected.error.is_none());
    }

    #[test]
    fn test_failure_without_retry_is_error() {
        let state = ConnectionState::default().apply(StateEvent::Failed {
            reason: "Invalid token".to_string(),
            retry: None,
        });
        assert_eq!(state.status, ConnectionStatus::Error);
        assert_eq!(state.error.as_deref(), Some("Invalid token"));
    }

    #[test]
    fn test_failure_clears_server_identifiers() {
        let connected = ConnectionState::default().apply(StateEvent::Authenticated {
            outcome: outcome("c1"),
            at: Utc::now(),
        });
        let lost = connected.apply(StateEvent::Failed {
            reason: "code 1006".to_string(),
            retry: Some(1),
        });
        assert_eq!(lost.status, ConnectionStatus::Reconnecting);
        assert!(lost.connection_id.is_none());
        assert!(lost.connected_at.is_none());
    }

    #[test]
    fn test_manual_attempt_clears_counter() {
        let exhausted = ConnectionState {
            status: ConnectionStatus::Error,
            reconnect_attempt: 2,
            ..Default::default()
        };
        let next = exhausted.apply(StateEvent::AttemptStarted {
            reset_attempts: true,
        });
        assert_eq!(next.reconnect_attempt, 0);
    }

    #[test]
    fn test_client_close_is_disconnected() {
        let connected = ConnectionState::default().apply(StateEvent::Authenticated {
            outcome: outcome("c1"),
            at: Utc::now(),
        });
        let closed = connected.apply(StateEvent::ClosedByClient);
        assert_eq!(closed.status, ConnectionStatus::Disconnected);
        assert_eq!(closed.reconnect_attempt, 0);
        assert!(closed.connection_id.is_none());
    }

    #[test]
    fn test_heartbeat_ack_only_touches_timestamp() {
        let connected = ConnectionState::default().apply(StateEvent::Authenticated {
            outcome: outcome("c1"),
            at: Utc::now(),
        });
        let at = Utc::now();
        let acked = connected.apply(StateEvent::HeartbeatAcknowledged { at });
        assert_eq!(acked.last_heartbeat, Some(at));
        assert_eq!(acked.connection_id, connected.connection_id);
        assert_eq!(acked.status, ConnectionStatus::Connected);
    }
}
