//! Outbound batching queue
//!
//! Frames are held in FIFO order and released when the queue reaches its
//! size limit or when the flush deadline, armed by the first queued frame,
//! expires. Each released frame is still written on its own.

use super::timer::Deadline;
use crate::config::BatchingConfig;
use std::time::Duration;

/// What the caller should do after queueing a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchAction {
    Queued,
    FlushNow,
}

#[derive(Debug)]
pub struct BatchQueue {
    enabled: bool,
    timeout: Duration,
    max_size: usize,
    items: Vec<String>,
    flush_timer: Deadline,
}

impl BatchQueue {
    pub fn new(config: &BatchingConfig) -> Self {
        Self {
            enabled: config.enabled,
            timeout: Duration::from_millis(config.timeout_ms),
            max_size: config.max_batch_size.max(1),
            items: Vec::new(),
            flush_timer: Deadline::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn has_pending_flush(&self) -> bool {
        self.flush_timer.is_armed()
    }

    /// Queue one encoded frame
    pub fn push(&mut self, frame: String) -> BatchAction {
        if self.items.is_empty() {
            self.flush_timer.arm(self.timeout);
        }
        self.items.push(frame);
        if self.items.len() >= self.max_size {
            BatchAction::FlushNow
        } else {
            BatchAction::Queued
        }
    }

    /// Take every queued frame and disarm the flush deadline
    pub fn take(&mut self) -> Vec<String> {
        self.flush_timer.cancel();
        std::mem::take(&mut self.items)
    }

    /// Drop every queued frame; returns how many were dropped
    pub fn discard(&mut self) -> usize {
        self.take().len()
    }

    /// Toggle batching; frames queued before disabling are returned for flushing
    pub fn set_enabled(&mut self, enabled: bool) -> Vec<String> {
        self.enabled = enabled;
        if enabled {
            Vec::new()
        } else {
            self.take()
        }
    }

    /// Resolves when the flush deadline expires
    pub async fn flush_due(&mut self) {
        self.flush_timer.fired().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(max_batch_size: usize) -> BatchQueue {
        BatchQueue::new(&BatchingConfig {
            enabled: true,
            timeout_ms: 50,
            max_batch_size,
        })
    }

    #[test]
    fn test_flush_now_at_max_size() {
        let mut queue = queue(3);
        assert_eq!(queue.push("a".into()), BatchAction::Queued);
        assert_eq!(queue.push("b".into()), BatchAction::Queued);
        assert_eq!(queue.push("c".into()), BatchAction::FlushNow);
        assert_eq!(queue.take(), vec!["a", "b", "c"]);
        assert!(queue.is_empty());
        assert!(!queue.has_pending_flush());
    }

    #[test]
    fn test_first_item_arms_timer() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async {
            let mut queue = queue(10);
            assert!(!queue.has_pending_flush());
            queue.push("a".into());
            assert!(queue.has_pending_flush());
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_measured_from_first_item() {
        let mut queue = queue(10);
        let start = tokio::time::Instant::now();
        queue.push("a".into());
        tokio::time::advance(Duration::from_millis(30)).await;
        queue.push("b".into());

        queue.flush_due().await;
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(50));
        assert!(waited < Duration::from_millis(80));
        assert_eq!(queue.take(), vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabling_returns_pending_items() {
        let mut queue = queue(10);
        queue.push("a".into());
        queue.push("b".into());

        let pending = queue.set_enabled(false);
        assert_eq!(pending, vec!["a", "b"]);
        assert!(!queue.is_enabled());
        assert!(!queue.has_pending_flush());
    }

    #[tokio::test(start_paused = true)]
    async fn test_discard_reports_count() {
        let mut queue = queue(10);
        queue.push("a".into());
        assert_eq!(queue.discard(), 1);
        assert_eq!(queue.len(), 0);
    }
}
