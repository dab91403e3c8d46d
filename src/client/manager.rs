//! Connection manager driver task
//!
//! One task per client owns the transport, the connection state, every
//! timer and the outbound batch queue. Client handles talk to it through a
//! command channel. State changes are published on a `watch` channel and
//! lifecycle notifications on a `broadcast` channel. Because only this task
//! mutates anything, there is never more than one live transport and timer
//! callbacks cannot race a teardown.

use super::auth::Authenticator;
use super::batching::{BatchAction, BatchQueue};
use super::dispatcher::EventDispatcher;
use super::heartbeat::{heartbeat_frame, HeartbeatMonitor};
use super::lifecycle::LifecycleEvent;
use super::reconnect::{ReconnectPolicy, ReconnectionController, ReconnectionDecision};
use super::state::{
    log_state_transition, AuthOutcome, ConnectionState, ConnectionStatus, StateEvent,
};
use super::timer::Deadline;
use crate::config::ClientConfig;
use crate::error::{redact_secrets, ClientError, ClientResult};
use crate::observability::metrics::ConnectionMetrics;
use crate::protocol::codec::{decode_frame, encode_envelope, InboundFrame};
use crate::protocol::{EventType, Payload};
use crate::transport::{
    Connection, Connector, TransportError, TransportEvent, ABNORMAL_CLOSURE, NORMAL_CLOSURE,
};
use chrono::Utc;
use futures_util::future::BoxFuture;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Upper bound on waiting for a close frame to be written
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

type Reply<T> = oneshot::Sender<ClientResult<T>>;

/// Requests from client handles
pub(crate) enum Command {
    Connect(Reply<()>),
    Disconnect(oneshot::Sender<()>),
    Destroy(oneshot::Sender<()>),
    Send {
        event_type: String,
        payload: Payload,
        reply: Reply<()>,
    },
    Heartbeat(Reply<()>),
    SetBatching { enabled: bool, reply: Reply<()> },
}

/// Channels and counters shared between the driver and client handles
pub(crate) struct DriverShared {
    pub state: watch::Sender<ConnectionState>,
    pub lifecycle: broadcast::Sender<LifecycleEvent>,
    pub dispatcher: EventDispatcher,
    pub metrics: Arc<ConnectionMetrics>,
    pub destroyed: Arc<AtomicBool>,
    pub armed_timers: Arc<AtomicUsize>,
}

/// Where the single transport is in its life
enum Phase {
    Idle,
    Opening(BoxFuture<'static, Result<Box<dyn Connection>, TransportError>>),
    Authenticating(Box<dyn Connection>),
    Open(Box<dyn Connection>),
}

enum PhaseSignal {
    Opened(Result<Box<dyn Connection>, TransportError>),
    Transport(Option<TransportEvent>),
}

/// Wait for whatever the current phase produces next; pends while idle
async fn next_phase_signal(phase: &mut Phase) -> PhaseSignal {
    match phase {
        Phase::Idle => std::future::pending().await,
        Phase::Opening(open) => PhaseSignal::Opened(open.await),
        Phase::Authenticating(connection) | Phase::Open(connection) => {
            PhaseSignal::Transport(connection.next_event().await)
        }
    }
}

/// Why a connect attempt did not reach the connected state
#[derive(Debug, Clone)]
enum AttemptFailure {
    Timeout { timeout_ms: u64 },
    Rejected(String),
    InvalidAuth,
    Transport(String),
    Closed { code: u16, reason: String },
}

impl AttemptFailure {
    fn to_error(&self) -> ClientError {
        match self {
            AttemptFailure::Timeout { timeout_ms } => ClientError::ConnectTimeout {
                timeout_ms: *timeout_ms,
            },
            AttemptFailure::Rejected(reason) => ClientError::AuthRejected(reason.clone()),
            AttemptFailure::InvalidAuth => ClientError::InvalidAuthResponse,
            AttemptFailure::Transport(reason) => ClientError::ConnectionFailed(reason.clone()),
            AttemptFailure::Closed { .. } => ClientError::ConnectionFailed(self.to_string()),
        }
    }
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::Closed { code, reason } if reason.is_empty() => {
                write!(f, "connection closed during handshake (code {code})")
            }
            AttemptFailure::Closed { code, reason } => {
                write!(f, "connection closed during handshake (code {code}): {reason}")
            }
            other => write!(f, "{}", other.to_error()),
        }
    }
}

async fn close_quietly(mut connection: Box<dyn Connection>, code: u16, reason: &str) {
    match tokio::time::timeout(CLOSE_TIMEOUT, connection.close(code, reason)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("Error while closing transport: {}", e),
        Err(_) => debug!("Timed out writing close frame"),
    }
}

pub(crate) struct ConnectionManager {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    commands: mpsc::Receiver<Command>,
    shared: DriverShared,
    authenticator: Authenticator,
    reconnect: ReconnectionController,
    heartbeat: HeartbeatMonitor,
    batch: BatchQueue,
    connect_timeout: Deadline,
    phase: Phase,
    waiters: Vec<Reply<()>>,
}

impl ConnectionManager {
    pub(crate) fn new(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        commands: mpsc::Receiver<Command>,
        shared: DriverShared,
    ) -> Self {
        Self {
            authenticator: Authenticator::from_config(&config),
            reconnect: ReconnectionController::new(ReconnectPolicy::from_config(&config)),
            heartbeat: HeartbeatMonitor::new(config.heartbeat_interval()),
            batch: BatchQueue::new(&config.batching),
            connect_timeout: Deadline::new(),
            phase: Phase::Idle,
            waiters: Vec::new(),
            config,
            connector,
            commands,
            shared,
        }
    }

    /// Drive the connection until the client is destroyed or every handle is dropped
    pub(crate) async fn run(mut self) {
        debug!("Connection driver started");
        loop {
            let keep_running = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("All client handles dropped");
                        self.shutdown().await;
                        false
                    }
                },
                signal = next_phase_signal(&mut self.phase) => {
                    self.handle_phase_signal(signal).await;
                    true
                }
                _ = self.connect_timeout.fired() => {
                    self.handle_connect_timeout().await;
                    true
                }
                _ = self.reconnect.fired() => {
                    debug!("Reconnect timer fired");
                    self.begin_attempt(false);
                    true
                }
                _ = self.heartbeat.tick() => {
                    if let Err(e) = self.send_heartbeat().await {
                        warn!("Heartbeat failed: {}", e);
                    }
                    true
                }
                _ = self.batch.flush_due() => {
                    self.flush_batch().await;
                    true
                }
            };
            self.publish_timer_gauge();
            if !keep_running {
                break;
            }
        }
        debug!("Connection driver stopped");
    }

    fn status(&self) -> ConnectionStatus {
        self.shared.state.borrow().status
    }

    fn transition(&mut self, event: StateEvent) {
        let current = self.shared.state.borrow().clone();
        let next = current.apply(event);
        log_state_transition(&current, &next);
        self.shared.state.send_replace(next);
    }

    fn emit(&self, event: LifecycleEvent) {
        // No receivers is fine
        let _ = self.shared.lifecycle.send(event);
    }

    fn armed_timer_count(&self) -> usize {
        [
            self.connect_timeout.is_armed(),
            self.reconnect.is_scheduled(),
            self.heartbeat.is_running(),
            self.batch.has_pending_flush(),
        ]
        .into_iter()
        .filter(|armed| *armed)
        .count()
    }

    fn publish_timer_gauge(&self) {
        self.shared
            .armed_timers
            .store(self.armed_timer_count(), Ordering::SeqCst);
    }

    fn log_frame(&self, direction: &str, frame: &str) {
        if self.config.debug {
            debug!(direction, frame, "Frame");
        } else {
            trace!(direction, frame, "Frame");
        }
    }

    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Connect(reply) => self.handle_connect(reply),
            Command::Disconnect(reply) => {
                self.disconnect().await;
                self.publish_timer_gauge();
                let _ = reply.send(());
            }
            Command::Destroy(reply) => {
                self.shutdown().await;
                self.publish_timer_gauge();
                let _ = reply.send(());
                return false;
            }
            Command::Send {
                event_type,
                payload,
                reply,
            } => {
                let result = self.send_envelope(&event_type, payload).await;
                let _ = reply.send(result);
            }
            Command::Heartbeat(reply) => {
                let result = self.send_heartbeat().await;
                let _ = reply.send(result);
            }
            Command::SetBatching { enabled, reply } => {
                let result = self.set_batching(enabled).await;
                let _ = reply.send(result);
            }
        }
        true
    }

    fn handle_connect(&mut self, reply: Reply<()>) {
        if self.shared.destroyed.load(Ordering::SeqCst) {
            let _ = reply.send(Err(ClientError::Destroyed));
            return;
        }
        match self.status() {
            ConnectionStatus::Connected => {
                let _ = reply.send(Ok(()));
            }
            ConnectionStatus::Connecting => {
                debug!("Connect requested while an attempt is in flight; joining it");
                self.waiters.push(reply);
            }
            ConnectionStatus::Reconnecting => {
                self.waiters.push(reply);
                self.begin_attempt(false);
            }
            ConnectionStatus::Disconnected | ConnectionStatus::Error => {
                self.waiters.push(reply);
                self.begin_attempt(true);
            }
        }
    }

    /// Start a connect attempt; only called while no transport exists
    fn begin_attempt(&mut self, manual: bool) {
        debug_assert!(matches!(self.phase, Phase::Idle));
        self.reconnect.cancel();
        // destroy() flags the client before its command reaches the driver
        if self.shared.destroyed.load(Ordering::SeqCst) {
            debug!("Client destroyed; not starting a connect attempt");
            return;
        }

        let reset_attempts = manual
            && matches!(
                self.status(),
                ConnectionStatus::Disconnected | ConnectionStatus::Error
            );
        self.transition(StateEvent::AttemptStarted { reset_attempts });
        self.shared.metrics.connection_attempt();

        let connector = Arc::clone(&self.connector);
        let url = self.config.url.clone();
        self.phase = Phase::Opening(Box::pin(async move { connector.connect(&url).await }));
        self.connect_timeout.arm(self.config.connection_timeout());

        info!(
            url = %redact_secrets(&self.config.url),
            attempt = self.shared.state.borrow().reconnect_attempt,
            "Opening real-time connection"
        );
    }

    async fn handle_phase_signal(&mut self, signal: PhaseSignal) {
        match signal {
            PhaseSignal::Opened(result) => {
                self.phase = Phase::Idle;
                match result {
                    Ok(connection) => self.start_handshake(connection).await,
                    Err(e) => self.fail_attempt(AttemptFailure::Transport(e.to_string())).await,
                }
            }
            PhaseSignal::Transport(event) => {
                if matches!(self.phase, Phase::Authenticating(_)) {
                    self.handle_handshake_event(event).await;
                } else {
                    self.handle_connected_event(event).await;
                }
            }
        }
    }

    async fn start_handshake(&mut self, mut connection: Box<dyn Connection>) {
        debug!("Transport open, sending handshake");
        let sent = match self.authenticator.handshake_frame() {
            Ok(frame) => connection.send(frame).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match sent {
            Ok(()) => self.phase = Phase::Authenticating(connection),
            Err(reason) => {
                close_quietly(connection, NORMAL_CLOSURE, "Handshake failed").await;
                self.fail_attempt(AttemptFailure::Transport(reason)).await;
            }
        }
    }

    async fn handle_handshake_event(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Frame(frame)) => {
                self.log_frame("inbound", &frame);
                match self.authenticator.evaluate(&frame) {
                    Ok(outcome) => self.complete_handshake(outcome),
                    Err(ClientError::AuthRejected(reason)) => {
                        self.fail_attempt(AttemptFailure::Rejected(reason)).await
                    }
                    Err(_) => self.fail_attempt(AttemptFailure::InvalidAuth).await,
                }
            }
            Some(TransportEvent::Closed { code, reason }) => {
                self.phase = Phase::Idle;
                self.fail_attempt(AttemptFailure::Closed { code, reason }).await;
            }
            Some(TransportEvent::Error(reason)) => {
                self.phase = Phase::Idle;
                self.fail_attempt(AttemptFailure::Transport(reason)).await;
            }
            None => {
                self.phase = Phase::Idle;
                self.fail_attempt(AttemptFailure::Closed {
                    code: ABNORMAL_CLOSURE,
                    reason: String::new(),
                })
                .await;
            }
        }
    }

    fn complete_handshake(&mut self, outcome: AuthOutcome) {
        self.connect_timeout.cancel();
        if let Phase::Authenticating(connection) = std::mem::replace(&mut self.phase, Phase::Idle)
        {
            self.phase = Phase::Open(connection);
        }

        self.transition(StateEvent::Authenticated {
            outcome: outcome.clone(),
            at: Utc::now(),
        });
        self.shared.metrics.connection_established();
        self.heartbeat.start();

        self.emit(LifecycleEvent::Connected {
            connection_id: outcome.connection_id,
            user_id: outcome.user_id,
            session_id: outcome.session_id,
            available_channels: outcome.available_channels,
        });
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
    }

    /// Take the live or half-open transport out of the phase, leaving it idle
    fn take_connection(&mut self) -> Option<Box<dyn Connection>> {
        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Authenticating(connection) | Phase::Open(connection) => Some(connection),
            // Dropping a pending open abandons it
            Phase::Opening(_) | Phase::Idle => None,
        }
    }

    async fn fail_attempt(&mut self, failure: AttemptFailure) {
        self.connect_timeout.cancel();
        let reason = failure.to_string();
        if let Some(connection) = self.take_connection() {
            close_quietly(connection, NORMAL_CLOSURE, &reason).await;
        }

        self.shared.metrics.connection_failed();
        warn!("Connection attempt failed: {}", redact_secrets(&reason));
        self.emit(LifecycleEvent::Error {
            message: reason.clone(),
        });
        let error = failure.to_error();
        self.enter_failure(reason, &error);
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(failure.to_error()));
        }
    }

    /// Record a failure and either schedule the next attempt or settle in ERROR
    fn enter_failure(&mut self, reason: String, error: &ClientError) {
        if !error.is_retryable() {
            warn!("Failure is not retryable: {}", error);
            self.transition(StateEvent::Failed {
                reason,
                retry: None,
            });
            return;
        }

        let attempts_made = self.shared.state.borrow().reconnect_attempt;
        let destroyed = self.shared.destroyed.load(Ordering::SeqCst);
        let policy = self.reconnect.policy().clone();

        match policy.decide(attempts_made, destroyed) {
            ReconnectionDecision::Proceed { attempt, delay } => {
                self.transition(StateEvent::Failed {
                    reason,
                    retry: Some(attempt),
                });
                self.shared.metrics.reconnect_scheduled();
                self.reconnect.schedule(delay);
                info!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling reconnect"
                );
                self.emit(LifecycleEvent::ReconnectScheduled {
                    attempt,
                    max_attempts: policy.max_attempts,
                    delay_ms: delay.as_millis() as u64,
                });
            }
            ReconnectionDecision::AbortMaxAttemptsExceeded => {
                warn!(
                    attempts = attempts_made,
                    "Reconnect attempts exhausted; waiting for an explicit connect"
                );
                self.transition(StateEvent::Failed {
                    reason,
                    retry: None,
                });
            }
            ReconnectionDecision::AbortDestroyed => {
                self.transition(StateEvent::Failed {
                    reason,
                    retry: None,
                });
            }
        }
    }

    async fn handle_connect_timeout(&mut self) {
        let timeout_ms = self.config.connection_timeout_ms;
        warn!(timeout_ms, "Connection attempt timed out");
        self.fail_attempt(AttemptFailure::Timeout { timeout_ms })
            .await;
    }

    async fn handle_connected_event(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Frame(frame)) => self.handle_inbound_frame(&frame),
            Some(TransportEvent::Closed { code, reason }) if code == NORMAL_CLOSURE => {
                self.closed_by_peer(code, reason);
            }
            Some(TransportEvent::Closed { code, reason }) => self.connection_lost(code, reason),
            Some(TransportEvent::Error(message)) => {
                warn!("Transport error: {}", message);
                self.emit(LifecycleEvent::Error {
                    message: message.clone(),
                });
                self.connection_lost(ABNORMAL_CLOSURE, message);
            }
            None => self.connection_lost(ABNORMAL_CLOSURE, String::new()),
        }
    }

    fn handle_inbound_frame(&mut self, frame: &str) {
        self.log_frame("inbound", frame);
        match decode_frame(frame) {
            Ok(InboundFrame::Event(event)) => {
                if event.event_type == EventType::ConnectionHeartbeat {
                    self.transition(StateEvent::HeartbeatAcknowledged { at: Utc::now() });
                }
                let started = Instant::now();
                let report = self.shared.dispatcher.dispatch(&event);
                self.shared
                    .metrics
                    .event_dispatched(started.elapsed(), report.failed);
            }
            Ok(InboundFrame::Auth(_)) => {
                self.shared.metrics.frame_discarded();
                debug!("Ignoring authentication response on an established connection");
            }
            Err(e) => {
                self.shared.metrics.frame_discarded();
                warn!("Discarding inbound frame: {}", e);
            }
        }
    }

    /// Tear down connected-only resources after the transport went away
    fn release_connection(&mut self) {
        self.phase = Phase::Idle;
        self.heartbeat.stop();
        let dropped = self.batch.discard();
        if dropped > 0 {
            warn!(dropped, "Dropping queued messages after connection loss");
        }
        self.shared.metrics.connection_ended();
    }

    fn closed_by_peer(&mut self, code: u16, reason: String) {
        info!(code, reason = %reason, "Server closed the connection");
        self.release_connection();
        self.transition(StateEvent::ClosedByPeer);
        self.emit(LifecycleEvent::Disconnected { code, reason });
    }

    fn connection_lost(&mut self, code: u16, reason: String) {
        warn!(code, reason = %reason, "Connection lost");
        self.release_connection();
        let message = if reason.is_empty() {
            format!("Connection closed (code {code})")
        } else {
            format!("Connection closed (code {code}): {reason}")
        };
        self.emit(LifecycleEvent::Disconnected { code, reason });
        let error = ClientError::ConnectionFailed(message.clone());
        self.enter_failure(message, &error);
    }

    async fn write_frame(&mut self, frame: String) -> Result<(), TransportError> {
        self.log_frame("outbound", &frame);
        let Phase::Open(connection) = &mut self.phase else {
            return Err(TransportError::Closed);
        };
        connection.send(frame).await
    }

    async fn write_counted(&mut self, frame: String) -> ClientResult<()> {
        match self.write_frame(frame).await {
            Ok(()) => {
                self.shared.metrics.message_sent();
                Ok(())
            }
            Err(e) => {
                self.shared.metrics.send_failed();
                Err(e.into())
            }
        }
    }

    fn ensure_open(&self) -> ClientResult<()> {
        let status = self.status();
        if status == ConnectionStatus::Connected && matches!(self.phase, Phase::Open(_)) {
            Ok(())
        } else {
            Err(ClientError::NotConnected { status })
        }
    }

    async fn send_envelope(&mut self, event_type: &str, payload: Payload) -> ClientResult<()> {
        self.ensure_open()?;
        let frame = encode_envelope(event_type, payload)?;

        if self.batch.is_enabled() {
            if self.batch.push(frame) == BatchAction::FlushNow {
                self.flush_batch().await;
            }
            return Ok(());
        }
        self.write_counted(frame).await
    }

    /// Write frames in order, stopping at the first failure
    async fn write_all(&mut self, frames: Vec<String>) -> ClientResult<()> {
        let total = frames.len();
        let mut written = 0;
        let mut result = Ok(());
        for frame in frames {
            if let Err(e) = self.write_counted(frame).await {
                warn!(written, total, "Flush interrupted: {}", e);
                result = Err(e);
                break;
            }
            written += 1;
        }
        self.shared.metrics.batch_flushed(written);
        debug!(written, total, "Flushed queued messages");
        result
    }

    async fn flush_batch(&mut self) {
        let frames = self.batch.take();
        if !frames.is_empty() {
            // Failures are logged inside write_all
            let _ = self.write_all(frames).await;
        }
    }

    async fn set_batching(&mut self, enabled: bool) -> ClientResult<()> {
        info!(enabled, "Batching toggled");
        let pending = self.batch.set_enabled(enabled);
        if pending.is_empty() {
            return Ok(());
        }
        self.write_all(pending).await
    }

    async fn send_heartbeat(&mut self) -> ClientResult<()> {
        self.ensure_open()?;
        let frame = heartbeat_frame()?;
        self.write_frame(frame).await?;
        self.shared.metrics.heartbeat_sent();
        Ok(())
    }

    async fn disconnect(&mut self) {
        if matches!(self.phase, Phase::Open(_)) {
            self.flush_batch().await;
        }

        self.connect_timeout.cancel();
        self.reconnect.cancel();
        self.heartbeat.stop();
        self.batch.discard();

        if let Some(connection) = self.take_connection() {
            close_quietly(connection, NORMAL_CLOSURE, "Client disconnect").await;
            self.emit(LifecycleEvent::Disconnected {
                code: NORMAL_CLOSURE,
                reason: "Client disconnect".to_string(),
            });
        }
        self.shared.metrics.connection_ended();
        self.transition(StateEvent::ClosedByClient);

        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(ClientError::aborted(
                "disconnect requested before the connection was established",
            )));
        }
    }

    async fn shutdown(&mut self) {
        self.shared.destroyed.store(true, Ordering::SeqCst);
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(ClientError::Destroyed));
        }
        self.disconnect().await;
        info!("Client destroyed");
    }
}
