//! Wire message types
//!
//! Four shapes cross the wire: the outbound [`Envelope`], the one-shot
//! [`HandshakeFrame`], the server's [`AuthResponse`], and inbound
//! [`RealtimeEvent`]s tagged with a closed [`EventType`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Key-value payload carried by envelopes and events
pub type Payload = Map<String, Value>;

/// Outbound message wrapper for every non-handshake send
///
/// # Examples
/// ```
/// use voyager_link::protocol::Envelope;
/// use serde_json::json;
///
/// let envelope = Envelope::new("chat_message", json!({"content": "hi"}).as_object().cloned().unwrap());
/// assert_eq!(envelope.event_type, "chat_message");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: Payload,
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    pub fn new(event_type: impl Into<String>, payload: Payload) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// Credential frame sent once, immediately after the transport opens
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandshakeFrame {
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<String>>,
}

/// Server reply to the handshake
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthResponse {
    pub success: bool,
    #[serde(default)]
    pub connection_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub available_channels: Vec<String>,
}

/// Closed set of inbound event tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ChatMessage,
    ChatMessageChunk,
    ChatMessageComplete,
    TypingStart,
    TypingStop,
    ToolCallStart,
    ToolCallProgress,
    ToolCallComplete,
    ToolCallError,
    AgentStatus,
    AgentTaskStart,
    AgentTaskProgress,
    AgentTaskComplete,
    AgentTaskError,
    ConnectionEstablished,
    ConnectionError,
    ConnectionHeartbeat,
    ConnectionClose,
    Error,
    Notification,
    SystemMessage,
}

impl EventType {
    pub const ALL: [EventType; 21] = [
        EventType::ChatMessage,
        EventType::ChatMessageChunk,
        EventType::ChatMessageComplete,
        EventType::TypingStart,
        EventType::TypingStop,
        EventType::ToolCallStart,
        EventType::ToolCallProgress,
        EventType::ToolCallComplete,
        EventType::ToolCallError,
        EventType::AgentStatus,
        EventType::AgentTaskStart,
        EventType::AgentTaskProgress,
        EventType::AgentTaskComplete,
        EventType::AgentTaskError,
        EventType::ConnectionEstablished,
        EventType::ConnectionError,
        EventType::ConnectionHeartbeat,
        EventType::ConnectionClose,
        EventType::Error,
        EventType::Notification,
        EventType::SystemMessage,
    ];

    /// Wire tag for this event type
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ChatMessage => "chat_message",
            EventType::ChatMessageChunk => "chat_message_chunk",
            EventType::ChatMessageComplete => "chat_message_complete",
            EventType::TypingStart => "typing_start",
            EventType::TypingStop => "typing_stop",
            EventType::ToolCallStart => "tool_call_start",
            EventType::ToolCallProgress => "tool_call_progress",
            EventType::ToolCallComplete => "tool_call_complete",
            EventType::ToolCallError => "tool_call_error",
            EventType::AgentStatus => "agent_status",
            EventType::AgentTaskStart => "agent_task_start",
            EventType::AgentTaskProgress => "agent_task_progress",
            EventType::AgentTaskComplete => "agent_task_complete",
            EventType::AgentTaskError => "agent_task_error",
            EventType::ConnectionEstablished => "connection_established",
            EventType::ConnectionError => "connection_error",
            EventType::ConnectionHeartbeat => "connection_heartbeat",
            EventType::ConnectionClose => "connection_close",
            EventType::Error => "error",
            EventType::Notification => "notification",
            EventType::SystemMessage => "system_message",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a tag is not part of the closed enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEventType(pub String);

impl fmt::Display for UnknownEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown event type '{}'", self.0)
    }
}

impl std::error::Error for UnknownEventType {}

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}

/// One decoded inbound event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RealtimeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub payload: Payload,
}
