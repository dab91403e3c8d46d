//! In-memory transport for tests
//!
//! [`MockConnector`] hands out [`MockConnection`]s and keeps a
//! [`MockServer`] handle for every connect call, so a test can play the
//! server side: answer the handshake, push events, close the socket and
//! inspect everything the client wrote.

use crate::transport::{Connection, Connector, TransportError, TransportEvent};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};

/// How the next connect call behaves
#[derive(Debug, Clone, PartialEq)]
pub enum OpenBehavior {
    /// Open immediately
    Accept,
    /// Fail to open with the given reason
    Refuse(String),
    /// Never finish opening
    Hang,
}

#[derive(Debug, Default)]
struct ServerLog {
    written: Vec<String>,
    client_close: Option<(u16, String)>,
    fail_writes: bool,
}

/// Server side of one mock connection
#[derive(Debug, Clone)]
pub struct MockServer {
    events: mpsc::UnboundedSender<TransportEvent>,
    log: Arc<Mutex<ServerLog>>,
}

impl MockServer {
    fn log(&self) -> std::sync::MutexGuard<'_, ServerLog> {
        self.log.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(&self, event: TransportEvent) {
        // The client may already have dropped the connection
        let _ = self.events.send(event);
    }

    /// Deliver one raw text frame
    pub fn deliver(&self, frame: impl Into<String>) {
        self.push(TransportEvent::Frame(frame.into()));
    }

    pub fn deliver_json(&self, value: &Value) {
        self.deliver(value.to_string());
    }

    /// Deliver a server event envelope
    pub fn deliver_event(&self, event_type: &str, payload: Value) {
        self.deliver_json(&json!({
            "id": uuid::Uuid::new_v4().to_string(),
            "type": event_type,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "payload": payload,
        }));
    }

    /// Answer the handshake successfully
    pub fn accept_auth(&self, connection_id: &str) {
        self.deliver_json(&json!({
            "success": true,
            "connection_id": connection_id,
            "user_id": "user-1",
            "available_channels": ["general"],
        }));
    }

    /// Answer the handshake with a rejection
    pub fn reject_auth(&self, error: &str) {
        self.deliver_json(&json!({ "success": false, "error": error }));
    }

    /// Close from the server side with a close frame
    pub fn close(&self, code: u16, reason: &str) {
        self.push(TransportEvent::Closed {
            code,
            reason: reason.to_string(),
        });
    }

    /// Fail the connection without a close frame
    pub fn fail(&self, message: &str) {
        self.push(TransportEvent::Error(message.to_string()));
    }

    /// Make every subsequent client write fail
    pub fn fail_writes(&self) {
        self.log().fail_writes = true;
    }

    /// Every frame the client wrote, in order
    pub fn written_frames(&self) -> Vec<String> {
        self.log().written.clone()
    }

    /// Written frames parsed as JSON; unparseable frames are skipped
    pub fn written_json(&self) -> Vec<Value> {
        self.written_frames()
            .iter()
            .filter_map(|frame| serde_json::from_str(frame).ok())
            .collect()
    }

    /// Written envelopes whose `type` matches
    pub fn written_of_type(&self, event_type: &str) -> Vec<Value> {
        self.written_json()
            .into_iter()
            .filter(|frame| frame["type"] == event_type)
            .collect()
    }

    /// Close code and reason the client closed with, if it did
    pub fn client_close(&self) -> Option<(u16, String)> {
        self.log().client_close.clone()
    }

    pub fn is_closed_by_client(&self) -> bool {
        self.client_close().is_some()
    }
}

/// Client side of one mock connection
#[derive(Debug)]
pub struct MockConnection {
    events: mpsc::UnboundedReceiver<TransportEvent>,
    log: Arc<Mutex<ServerLog>>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        let mut log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        if log.client_close.is_some() {
            return Err(TransportError::Closed);
        }
        if log.fail_writes {
            return Err(TransportError::SendFailed("mock write failure".to_string()));
        }
        log.written.push(frame);
        Ok(())
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        let mut log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        if log.client_close.is_none() {
            log.client_close = Some((code, reason.to_string()));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct ConnectorState {
    servers: Mutex<Vec<MockServer>>,
    plan: Mutex<VecDeque<OpenBehavior>>,
    opened: watch::Sender<usize>,
}

/// Connector that records every connect call
#[derive(Debug, Clone)]
pub struct MockConnector {
    state: Arc<ConnectorState>,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector {
    pub fn new() -> Self {
        let (opened, _) = watch::channel(0);
        Self {
            state: Arc::new(ConnectorState {
                servers: Mutex::new(Vec::new()),
                plan: Mutex::new(VecDeque::new()),
                opened,
            }),
        }
    }

    /// Queue the behavior of a future connect call; unqueued calls accept
    pub fn push_behavior(&self, behavior: OpenBehavior) {
        self.state
            .plan
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(behavior);
    }

    /// Number of transports the client has tried to create
    pub fn connection_count(&self) -> usize {
        *self.state.opened.borrow()
    }

    /// Server handle for the `index`th connect call (zero-based)
    pub fn server(&self, index: usize) -> Option<MockServer> {
        self.state
            .servers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(index)
            .cloned()
    }

    /// Wait until `count` connect calls have happened and return the latest server
    pub async fn wait_for_connection(&self, count: usize) -> MockServer {
        let mut opened = self.state.opened.subscribe();
        // The sender lives as long as the connector, so this cannot fail
        let _ = opened.wait_for(|n| *n >= count).await;
        self.server(count.saturating_sub(1))
            .unwrap_or_else(|| panic!("connection {count} was never opened"))
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, TransportError> {
        let behavior = self
            .state
            .plan
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(OpenBehavior::Accept);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let log = Arc::new(Mutex::new(ServerLog::default()));
        let server = MockServer {
            events: events_tx,
            log: Arc::clone(&log),
        };
        self.state
            .servers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(server);
        self.state.opened.send_modify(|n| *n += 1);

        match behavior {
            OpenBehavior::Accept => Ok(Box::new(MockConnection {
                events: events_rx,
                log,
            })),
            OpenBehavior::Refuse(reason) => Err(TransportError::OpenFailed {
                url: url.to_string(),
                reason,
            }),
            OpenBehavior::Hang => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let connector = MockConnector::new();
        let mut connection = connector.connect("ws://mock").await.unwrap();
        let server = connector.server(0).unwrap();

        connection.send("hello".to_string()).await.unwrap();
        server.deliver("world");

        assert_eq!(server.written_frames(), vec!["hello"]);
        assert_eq!(
            connection.next_event().await,
            Some(TransportEvent::Frame("world".to_string()))
        );
    }

    #[tokio::test]
    async fn test_refuse_counts_as_a_connection() {
        let connector = MockConnector::new();
        connector.push_behavior(OpenBehavior::Refuse("nope".to_string()));

        assert!(connector.connect("ws://mock").await.is_err());
        assert_eq!(connector.connection_count(), 1);
        assert!(connector.connect("ws://mock").await.is_ok());
        assert_eq!(connector.connection_count(), 2);
    }

    #[tokio::test]
    async fn test_writes_after_close_fail() {
        let connector = MockConnector::new();
        let mut connection = connector.connect("ws://mock").await.unwrap();
        connection.close(1000, "bye").await.unwrap();

        assert!(connection.send("late".to_string()).await.is_err());
        let server = connector.server(0).unwrap();
        assert_eq!(server.client_close(), Some((1000, "bye".to_string())));
        assert!(server.written_frames().is_empty());
    }
}
