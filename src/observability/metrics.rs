//! Per-client connection metrics
//!
//! The connection manager records into a [`ConnectionMetrics`] shared with
//! the client handle; readers take serializable snapshots. Counters are
//! atomics, timing samples sit behind a mutex and are capped.

use crate::client::state::ConnectionStatus;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Samples kept for latency averages
const MAX_LATENCY_SAMPLES: usize = 1000;

/// Reconnects older than this no longer count against connection quality
const RECONNECT_WINDOW: Duration = Duration::from_secs(3600);

/// Counters and timings for one client instance
#[derive(Debug, Default)]
pub struct ConnectionMetrics {
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    reconnects_scheduled: AtomicU64,
    messages_sent: AtomicU64,
    send_failures: AtomicU64,
    messages_received: AtomicU64,
    frames_discarded: AtomicU64,
    heartbeats_sent: AtomicU64,
    handler_failures: AtomicU64,
    batches_flushed: AtomicU64,
    batched_messages: AtomicU64,
    timing: Mutex<TimingState>,
}

#[derive(Debug, Default)]
struct TimingState {
    connected_since: Option<Instant>,
    last_message_at: Option<Instant>,
    dispatch_latencies_us: VecDeque<u64>,
    max_dispatch_latency_us: u64,
    recent_reconnects: VecDeque<Instant>,
}

impl TimingState {
    fn prune_reconnects(&mut self) {
        while let Some(at) = self.recent_reconnects.front() {
            if at.elapsed() < RECONNECT_WINDOW {
                break;
            }
            self.recent_reconnects.pop_front();
        }
    }
}

impl ConnectionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_timing<R>(&self, f: impl FnOnce(&mut TimingState) -> R) -> R {
        let mut timing = self.timing.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut timing)
    }

    pub fn connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.with_timing(|t| t.connected_since = Some(Instant::now()));
    }

    pub fn connection_failed(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
        self.connection_ended();
    }

    pub fn connection_ended(&self) {
        self.with_timing(|t| t.connected_since = None);
    }

    pub fn reconnect_scheduled(&self) {
        self.reconnects_scheduled.fetch_add(1, Ordering::Relaxed);
        self.with_timing(|t| {
            t.prune_reconnects();
            t.recent_reconnects.push_back(Instant::now());
        });
    }

    pub fn message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn send_failed(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_discarded(&self) {
        self.frames_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn heartbeat_sent(&self) {
        self.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn batch_flushed(&self, size: usize) {
        self.batches_flushed.fetch_add(1, Ordering::Relaxed);
        self.batched_messages
            .fetch_add(size as u64, Ordering::Relaxed);
    }

    /// Record one dispatched event and how long its handlers took
    pub fn event_dispatched(&self, latency: Duration, handler_failures: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.handler_failures
            .fetch_add(handler_failures as u64, Ordering::Relaxed);
        let micros = latency.as_micros().min(u64::MAX as u128) as u64;
        self.with_timing(|t| {
            t.last_message_at = Some(Instant::now());
            t.dispatch_latencies_us.push_back(micros);
            if t.dispatch_latencies_us.len() > MAX_LATENCY_SAMPLES {
                t.dispatch_latencies_us.pop_front();
            }
            t.max_dispatch_latency_us = t.max_dispatch_latency_us.max(micros);
        });
    }

    /// Counter snapshot for `RealtimeClient::stats`
    pub fn stats(&self, status: ConnectionStatus, listeners: usize) -> ClientStats {
        let uptime_ms = self.with_timing(|t| t.connected_since.map(|s| s.elapsed().as_millis() as u64));
        ClientStats {
            status,
            connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
            connections_established: self.connections_established.load(Ordering::Relaxed),
            connection_failures: self.connection_failures.load(Ordering::Relaxed),
            reconnects_scheduled: self.reconnects_scheduled.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            frames_discarded: self.frames_discarded.load(Ordering::Relaxed),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
            listeners,
            uptime_ms,
        }
    }

    /// Timing snapshot for `RealtimeClient::performance_metrics`
    pub fn performance(&self) -> PerformanceMetrics {
        let (uptime, since_last, average, max, recent_reconnects) = self.with_timing(|t| {
            t.prune_reconnects();
            let average = if t.dispatch_latencies_us.is_empty() {
                None
            } else {
                Some(
                    t.dispatch_latencies_us.iter().sum::<u64>() as f64
                        / t.dispatch_latencies_us.len() as f64,
                )
            };
            (
                t.connected_since.map(|s| s.elapsed()),
                t.last_message_at.map(|s| s.elapsed()),
                average,
                t.max_dispatch_latency_us,
                t.recent_reconnects.len() as u64,
            )
        });

        let batches = self.batches_flushed.load(Ordering::Relaxed);
        let batched = self.batched_messages.load(Ordering::Relaxed);

        PerformanceMetrics {
            uptime_ms: uptime.map(|d| d.as_millis() as u64),
            time_since_last_message_ms: since_last.map(|d| d.as_millis() as u64),
            average_dispatch_latency_us: average,
            max_dispatch_latency_us: max,
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            batches_flushed: batches,
            average_batch_size: (batches > 0).then(|| batched as f64 / batches as f64),
            quality: assess_connection_quality(uptime, since_last, recent_reconnects),
        }
    }
}

/// Serializable counter snapshot
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ClientStats {
    pub status: ConnectionStatus,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub reconnects_scheduled: u64,
    pub messages_sent: u64,
    pub send_failures: u64,
    pub messages_received: u64,
    pub frames_discarded: u64,
    pub heartbeats_sent: u64,
    pub listeners: usize,
    pub uptime_ms: Option<u64>,
}

/// Serializable timing snapshot
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PerformanceMetrics {
    pub uptime_ms: Option<u64>,
    pub time_since_last_message_ms: Option<u64>,
    pub average_dispatch_latency_us: Option<f64>,
    pub max_dispatch_latency_us: u64,
    pub handler_failures: u64,
    pub batches_flushed: u64,
    pub average_batch_size: Option<f64>,
    pub quality: ConnectionQuality,
}

/// Connection quality grade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    /// Stable for over an hour with no reconnects
    Excellent,
    Good,
    Fair,
    Poor,
    /// Not connected, silent, or reconnecting constantly
    Critical,
}

/// Grade a connection from uptime, recent activity and the reconnects of the last hour (pure function)
pub fn assess_connection_quality(
    uptime: Option<Duration>,
    time_since_last_message: Option<Duration>,
    reconnects: u64,
) -> ConnectionQuality {
    let Some(uptime) = uptime else {
        return ConnectionQuality::Critical;
    };
    if matches!(time_since_last_message, Some(idle) if idle >= Duration::from_secs(300)) {
        return ConnectionQuality::Critical;
    }

    match reconnects {
        0 if uptime > Duration::from_secs(3600) => ConnectionQuality::Excellent,
        0 => ConnectionQuality::Good,
        1..=2 if uptime > Duration::from_secs(1800) => ConnectionQuality::Good,
        1..=5 => ConnectionQuality::Fair,
        6..=10 => ConnectionQuality::Poor,
        _ => ConnectionQuality::Critical,
    }
}
