//! Frame encoding and validation
//!
//! Inbound text is classified before anything else sees it: a frame carrying
//! a boolean `success` field is an auth response, a frame carrying a known
//! `type` tag and an object payload is an event, and everything else is a
//! [`CodecError`]. Callers log and drop codec errors.

use super::messages::{AuthResponse, Envelope, EventType, HandshakeFrame, Payload, RealtimeEvent};
use serde_json::Value;
use thiserror::Error;

/// Frame classification and validation failures
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Frame is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("Frame is not a JSON object")]
    NotAnObject,
    #[error("Frame has unknown event type '{0}'")]
    UnknownEventType(String),
    #[error("Frame does not match any known shape: {0}")]
    UnrecognizedShape(String),
    #[error("Failed to serialize frame: {0}")]
    Serialization(#[source] serde_json::Error),
}

/// A validated inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Auth(AuthResponse),
    Event(RealtimeEvent),
}

/// Serialize an outbound envelope stamped with the current time
pub fn encode_envelope(event_type: &str, payload: Payload) -> Result<String, CodecError> {
    serde_json::to_string(&Envelope::new(event_type, payload)).map_err(CodecError::Serialization)
}

/// Parse an outbound envelope back into its typed form
pub fn decode_envelope(frame: &str) -> Result<Envelope, CodecError> {
    serde_json::from_str(frame).map_err(CodecError::InvalidJson)
}

/// Serialize the handshake frame
pub fn encode_handshake(handshake: &HandshakeFrame) -> Result<String, CodecError> {
    serde_json::to_string(handshake).map_err(CodecError::Serialization)
}

/// Whether a parsed value has the auth-response shape
pub fn is_auth_response(value: &Value) -> bool {
    value.get("success").map(Value::is_boolean).unwrap_or(false)
}

/// Classify and validate one inbound text frame
pub fn decode_frame(frame: &str) -> Result<InboundFrame, CodecError> {
    let value: Value = serde_json::from_str(frame).map_err(CodecError::InvalidJson)?;
    if !value.is_object() {
        return Err(CodecError::NotAnObject);
    }

    if is_auth_response(&value) {
        return serde_json::from_value(value)
            .map(InboundFrame::Auth)
            .map_err(|e| CodecError::UnrecognizedShape(e.to_string()));
    }

    let tag = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| CodecError::UnrecognizedShape("missing 'type' tag".to_string()))?;
    if tag.parse::<EventType>().is_err() {
        return Err(CodecError::UnknownEventType(tag.to_string()));
    }
    if !value.get("payload").map(Value::is_object).unwrap_or(false) {
        return Err(CodecError::UnrecognizedShape(
            "'payload' must be an object".to_string(),
        ));
    }

    serde_json::from_value(value)
        .map(InboundFrame::Event)
        .map_err(|e| CodecError::UnrecognizedShape(e.to_string()))
}
