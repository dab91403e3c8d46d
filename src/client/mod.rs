//! Real-time connection client
//!
//! [`RealtimeClient`] is the public handle. Behind it a single driver task
//! ([`manager`]) runs the connection state machine, built from small parts:
//! the handshake ([`auth`]), the keep-alive ([`heartbeat`]), the reconnect
//! policy ([`reconnect`]), outbound batching ([`batching`]) and typed event
//! dispatch ([`dispatcher`]).

pub mod auth;
pub mod batching;
pub mod dispatcher;
pub mod heartbeat;
pub mod lifecycle;
pub(crate) mod manager;
pub mod realtime;
pub mod reconnect;
pub mod state;
pub mod timer;

pub use dispatcher::{DispatchReport, EventDispatcher, EventHandler, HandlerId, HandlerResult};
pub use lifecycle::LifecycleEvent;
pub use realtime::{RealtimeClient, CHAT_MESSAGE_TYPE, SUBSCRIBE_TYPE};
pub use reconnect::{ReconnectPolicy, ReconnectionDecision};
pub use state::{AuthOutcome, ConnectionState, ConnectionStatus, StateEvent};
