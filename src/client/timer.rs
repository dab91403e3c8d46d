//! Cancellable one-shot deadline

use std::time::Duration;
use tokio::time::{sleep_until, Instant};

/// Far enough ahead to mean "never" without overflowing `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// A one-shot timer owned by whichever component armed it
///
/// [`Deadline::fired`] is cancel-safe and pends forever while disarmed, so
/// it can sit in a `tokio::select!` branch unconditionally.
#[derive(Debug, Default)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) the deadline `after` from now
    pub fn arm(&mut self, after: Duration) {
        self.at = Some(Instant::now() + after.min(FAR_FUTURE));
    }

    pub fn cancel(&mut self) {
        self.at = None;
    }

    pub fn is_armed(&self) -> bool {
        self.at.is_some()
    }

    /// Wait for the deadline, disarming it once it fires
    pub async fn fired(&mut self) {
        match self.at {
            Some(at) => {
                sleep_until(at).await;
                self.at = None;
            }
            None => std::future::pending::<()>().await,
        }
    }
}
