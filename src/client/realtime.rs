//! Public client handle
//!
//! [`RealtimeClient`] is cheap to clone. Every clone talks to the same
//! connection driver task; the driver shuts down when `destroy()` is called
//! or when the last clone is dropped.

use super::dispatcher::{EventDispatcher, HandlerId, HandlerResult};
use super::lifecycle::LifecycleEvent;
use super::manager::{Command, ConnectionManager, DriverShared};
use super::state::{ConnectionState, ConnectionStatus};
use crate::config::ClientConfig;
use crate::error::{redact_secrets, ClientError, ClientResult};
use crate::observability::metrics::{ClientStats, ConnectionMetrics, PerformanceMetrics};
use crate::protocol::{EventType, Payload, RealtimeEvent};
use crate::transport::websocket::WebSocketConnector;
use crate::transport::Connector;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{info, Instrument};
use uuid::Uuid;

const COMMAND_BUFFER: usize = 64;
const LIFECYCLE_BUFFER: usize = 64;

/// Outbound type for chat messages
pub const CHAT_MESSAGE_TYPE: &str = "chat_message";

/// Outbound type for channel subscription changes
pub const SUBSCRIBE_TYPE: &str = "subscribe";

struct Inner {
    client_id: Uuid,
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
    lifecycle: broadcast::Sender<LifecycleEvent>,
    dispatcher: EventDispatcher,
    metrics: Arc<ConnectionMetrics>,
    destroyed: Arc<AtomicBool>,
    armed_timers: Arc<AtomicUsize>,
}

/// Handle to one managed real-time connection
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("client_id", &self.inner.client_id)
            .field("status", &self.status())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl RealtimeClient {
    /// Validate the configuration and spawn the connection driver
    ///
    /// Must be called from within a Tokio runtime. No connection is opened
    /// until [`RealtimeClient::connect`] is called.
    pub fn new(config: ClientConfig, connector: Arc<dyn Connector>) -> ClientResult<Self> {
        config.validate()?;

        let client_id = Uuid::new_v4();
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (state_tx, state_rx) = watch::channel(ConnectionState::default());
        let (lifecycle, _) = broadcast::channel(LIFECYCLE_BUFFER);
        let dispatcher = EventDispatcher::new();
        let metrics = Arc::new(ConnectionMetrics::new());
        let destroyed = Arc::new(AtomicBool::new(false));
        let armed_timers = Arc::new(AtomicUsize::new(0));

        info!(
            client_id = %client_id,
            url = %redact_secrets(&config.url),
            "Creating real-time client"
        );

        let shared = DriverShared {
            state: state_tx,
            lifecycle: lifecycle.clone(),
            dispatcher: dispatcher.clone(),
            metrics: Arc::clone(&metrics),
            destroyed: Arc::clone(&destroyed),
            armed_timers: Arc::clone(&armed_timers),
        };
        let manager = ConnectionManager::new(config, connector, command_rx, shared);
        let span = crate::connection_span!(client_id = %client_id);
        tokio::spawn(manager.run().instrument(span));

        Ok(Self {
            inner: Arc::new(Inner {
                client_id,
                commands: command_tx,
                state: state_rx,
                lifecycle,
                dispatcher,
                metrics,
                destroyed,
                armed_timers,
            }),
        })
    }

    /// Client over a real WebSocket
    pub fn websocket(config: ClientConfig) -> ClientResult<Self> {
        Self::new(config, Arc::new(WebSocketConnector))
    }

    pub fn client_id(&self) -> Uuid {
        self.inner.client_id
    }

    fn stopped_error(&self) -> ClientError {
        if self.is_destroyed() {
            ClientError::Destroyed
        } else {
            ClientError::DriverStopped
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> ClientResult<T> {
        let (reply, response) = oneshot::channel();
        self.inner
            .commands
            .send(build(reply))
            .await
            .map_err(|_| self.stopped_error())?;
        response.await.map_err(|_| self.stopped_error())
    }

    /// Open the connection and complete the handshake
    ///
    /// Resolves once the client is connected. Calling it while an attempt is
    /// already in flight joins that attempt instead of opening a second
    /// transport; calling it while connected resolves immediately.
    pub async fn connect(&self) -> ClientResult<()> {
        if self.is_destroyed() {
            return Err(ClientError::Destroyed);
        }
        self.request(Command::Connect).await?
    }

    /// Close the connection with code 1000 and cancel any pending reconnect
    ///
    /// Queued batched messages are flushed first. The client may connect again.
    pub async fn disconnect(&self) -> ClientResult<()> {
        if self.is_destroyed() {
            return Ok(());
        }
        self.request(Command::Disconnect).await
    }

    /// Disconnect and permanently shut the client down; idempotent
    pub async fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        // The driver may already be gone if it stopped on its own
        let _ = self.request(Command::Destroy).await;
    }

    /// Send one envelope; `payload` must be a JSON object
    pub async fn send(&self, event_type: &str, payload: Value) -> ClientResult<()> {
        let Value::Object(payload) = payload else {
            return Err(ClientError::InvalidPayload);
        };
        self.send_payload(event_type, payload).await
    }

    /// Send one envelope with an already-built payload map
    pub async fn send_payload(&self, event_type: &str, payload: Payload) -> ClientResult<()> {
        let status = self.status();
        if status != ConnectionStatus::Connected {
            return Err(ClientError::NotConnected { status });
        }
        let event_type = event_type.to_string();
        self.request(|reply| Command::Send {
            event_type,
            payload,
            reply,
        })
        .await?
    }

    /// Send a chat message with optional attachments
    pub async fn send_chat_message(
        &self,
        content: &str,
        attachments: Option<Vec<Value>>,
    ) -> ClientResult<()> {
        let mut payload = json!({ "content": content });
        if let Some(attachments) = attachments {
            payload["attachments"] = Value::Array(attachments);
        }
        self.send(CHAT_MESSAGE_TYPE, payload).await
    }

    /// Ask the server to add and remove channel subscriptions
    pub async fn subscribe_to_channels(
        &self,
        add: Vec<String>,
        remove: Option<Vec<String>>,
    ) -> ClientResult<()> {
        let payload = json!({
            "add": add,
            "remove": remove.unwrap_or_default(),
        });
        self.send(SUBSCRIBE_TYPE, payload).await
    }

    /// Send one keep-alive now, outside the regular schedule
    pub async fn send_heartbeat(&self) -> ClientResult<()> {
        self.request(Command::Heartbeat).await?
    }

    /// Turn outbound batching on or off; turning it off flushes the queue
    pub async fn set_batching_enabled(&self, enabled: bool) -> ClientResult<()> {
        self.request(|reply| Command::SetBatching { enabled, reply })
            .await?
    }

    /// Register a handler for one event type
    pub fn on<F>(&self, event_type: EventType, handler: F) -> HandlerId
    where
        F: Fn(&RealtimeEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.inner.dispatcher.on(event_type, handler)
    }

    /// Remove one handler; returns whether it was registered
    pub fn off(&self, event_type: EventType, id: HandlerId) -> bool {
        self.inner.dispatcher.off(event_type, id)
    }

    /// Remove every handler for one type, or every handler when `None`
    pub fn remove_all_listeners(&self, event_type: Option<EventType>) -> usize {
        self.inner.dispatcher.remove_all(event_type)
    }

    pub fn listener_count(&self, event_type: EventType) -> usize {
        self.inner.dispatcher.listener_count(event_type)
    }

    /// Snapshot of the current connection state
    pub fn state(&self) -> ConnectionState {
        self.inner.state.borrow().clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.state.borrow().status
    }

    /// Receiver that observes every published state
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.clone()
    }

    /// Subscribe to lifecycle notifications from this point on
    pub fn lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.lifecycle.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> ClientStats {
        self.inner
            .metrics
            .stats(self.status(), self.inner.dispatcher.total_listeners())
    }

    pub fn performance_metrics(&self) -> PerformanceMetrics {
        self.inner.metrics.performance()
    }

    /// Number of armed timers (connect timeout, reconnect, heartbeat, batch flush)
    pub fn pending_timers(&self) -> usize {
        self.inner.armed_timers.load(Ordering::SeqCst)
    }
}
