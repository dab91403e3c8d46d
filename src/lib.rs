//! Voyager Link
//!
//! A persistent, authenticated real-time connection client for the Voyager
//! travel-planning platform.
//!
//! # Overview
//!
//! - One managed WebSocket per client with a token handshake
//! - Automatic reconnection with bounded exponential backoff
//! - Keep-alive heartbeats and connection-quality metrics
//! - Typed event dispatch to registered handlers
//! - Optional outbound batching
//!
//! # Quick Start
//!
//! ```no_run
//! use voyager_link::{ClientConfig, EventType, RealtimeClient};
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), voyager_link::ClientError> {
//! let config = ClientConfig::new("wss://api.example.com/ws", "my-token")
//!     .with_session_id("trip-42");
//! let client = RealtimeClient::websocket(config)?;
//!
//! client.on(EventType::ChatMessage, |event| {
//!     println!("chat: {}", serde_json::Value::Object(event.payload.clone()));
//!     Ok(())
//! });
//!
//! client.connect().await?;
//! client.send("typing_start", json!({})).await?;
//! client.send_chat_message("Find me a hotel in Lisbon", None).await?;
//! client.destroy().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod testing;
pub mod transport;

pub use client::{
    ConnectionState, ConnectionStatus, HandlerId, LifecycleEvent, RealtimeClient,
};
pub use config::{BatchingConfig, ClientConfig, ConfigError};
pub use error::{ClientError, ClientResult};
pub use observability::{ClientStats, ConnectionQuality, PerformanceMetrics};
pub use protocol::{Envelope, EventType, Payload, RealtimeEvent};
pub use transport::{Connection, Connector, TransportError, TransportEvent};
