//! Wire protocol for the real-time connection
//!
//! Message types and the codec that validates inbound frames.

pub mod codec;
pub mod messages;

pub use codec::{decode_envelope, decode_frame, encode_envelope, CodecError, InboundFrame};
pub use messages::{
    AuthResponse, Envelope, EventType, HandshakeFrame, Payload, RealtimeEvent, UnknownEventType,
};
