//! Keep-alive ticker
//!
//! Runs only while the connection is authenticated. The manager starts it
//! once per successful handshake and stops it on every exit from the
//! connected state.

use crate::protocol::{encode_envelope, CodecError, Payload};
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Envelope type used for outbound keep-alives
pub const HEARTBEAT_TYPE: &str = "heartbeat";

#[derive(Debug)]
pub struct HeartbeatMonitor {
    period: Duration,
    ticker: Option<Interval>,
}

impl HeartbeatMonitor {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            ticker: None,
        }
    }

    /// Start ticking; the first tick lands one full period from now
    pub fn start(&mut self) {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
    }

    pub fn stop(&mut self) {
        self.ticker = None;
    }

    pub fn is_running(&self) -> bool {
        self.ticker.is_some()
    }

    /// Resolves on each tick; pends forever while stopped
    pub async fn tick(&mut self) {
        match self.ticker.as_mut() {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

/// Encode one keep-alive envelope
pub fn heartbeat_frame() -> Result<String, CodecError> {
    encode_envelope(HEARTBEAT_TYPE, Payload::new())
}
