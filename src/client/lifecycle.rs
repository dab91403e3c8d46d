//! Connection lifecycle notifications
//!
//! Broadcast to every receiver obtained from `RealtimeClient::lifecycle`.
//! Slow receivers may observe `RecvError::Lagged`; the connection state is
//! always available from `RealtimeClient::state`.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// The handshake succeeded
    Connected {
        connection_id: String,
        user_id: Option<String>,
        session_id: Option<String>,
        available_channels: Vec<String>,
    },
    /// The transport closed, either by the peer or by `disconnect()`
    Disconnected { code: u16, reason: String },
    /// A connect attempt or the live connection failed
    Error { message: String },
    /// A reconnection attempt was scheduled
    ReconnectScheduled {
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
    },
}
