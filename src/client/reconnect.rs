//! Reconnection policy and scheduling
//!
//! The policy is pure: given how many attempts have been made it decides
//! whether another one is allowed and how long to wait. The controller owns
//! the timer that fires when the wait is over.

use super::timer::Deadline;
use crate::config::ClientConfig;
use std::time::Duration;

/// Largest exponent applied to the base delay; keeps the shift in range.
const MAX_BACKOFF_EXPONENT: u32 = 31;

/// Bounded exponential backoff
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Attempt ceiling; zero disables automatic reconnection
    pub max_attempts: u32,
    /// Delay before the first attempt; doubles on each subsequent attempt
    pub base_delay: Duration,
}

/// Outcome of a reconnection decision
#[derive(Debug, Clone, PartialEq)]
pub enum ReconnectionDecision {
    /// Schedule attempt number `attempt` after `delay`
    Proceed { attempt: u32, delay: Duration },
    /// The client was destroyed; never reconnect
    AbortDestroyed,
    /// The attempt ceiling has been reached
    AbortMaxAttemptsExceeded,
}

impl ReconnectPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_attempts: config.reconnect_attempts,
            base_delay: config.reconnect_delay(),
        }
    }

    /// `base_delay × 2^(attempt−1)`, saturating; attempt numbering starts at 1
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Decide whether to schedule another attempt (pure function)
    pub fn decide(&self, attempts_made: u32, destroyed: bool) -> ReconnectionDecision {
        if destroyed {
            return ReconnectionDecision::AbortDestroyed;
        }
        if attempts_made >= self.max_attempts {
            return ReconnectionDecision::AbortMaxAttemptsExceeded;
        }
        let attempt = attempts_made + 1;
        ReconnectionDecision::Proceed {
            attempt,
            delay: self.backoff_delay(attempt),
        }
    }
}

/// Owns the reconnect timer
#[derive(Debug)]
pub struct ReconnectionController {
    policy: ReconnectPolicy,
    timer: Deadline,
}

impl ReconnectionController {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            timer: Deadline::new(),
        }
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn schedule(&mut self, delay: Duration) {
        self.timer.arm(delay);
    }

    pub fn cancel(&mut self) {
        self.timer.cancel();
    }

    pub fn is_scheduled(&self) -> bool {
        self.timer.is_armed()
    }

    /// Resolves when the scheduled delay has elapsed
    pub async fn fired(&mut self) {
        self.timer.fired().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy(max_attempts: u32, base_ms: u64) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts,
            base_delay: Duration::from_millis(base_ms),
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = policy(5, 100);
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_delay(4), Duration::from_millis(800));
    }

    #[test]
    fn test_attempt_zero_treated_as_first() {
        assert_eq!(policy(5, 100).backoff_delay(0), Duration::from_millis(100));
    }

    #[test]
    fn test_decide_proceeds_until_ceiling() {
        let policy = policy(2, 100);
        assert_eq!(
            policy.decide(0, false),
            ReconnectionDecision::Proceed {
                attempt: 1,
                delay: Duration::from_millis(100)
            }
        );
        assert_eq!(
            policy.decide(1, false),
            ReconnectionDecision::Proceed {
                attempt: 2,
                delay: Duration::from_millis(200)
            }
        );
        assert_eq!(
            policy.decide(2, false),
            ReconnectionDecision::AbortMaxAttemptsExceeded
        );
    }

    #[test]
    fn test_destroyed_always_aborts() {
        assert_eq!(
            policy(5, 100).decide(0, true),
            ReconnectionDecision::AbortDestroyed
        );
    }

    #[test]
    fn test_zero_ceiling_never_reconnects() {
        assert_eq!(
            policy(0, 100).decide(0, false),
            ReconnectionDecision::AbortMaxAttemptsExceeded
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_controller_fires_after_delay() {
        let mut controller = ReconnectionController::new(policy(1, 10));
        controller.schedule(Duration::from_millis(10));
        assert!(controller.is_scheduled());
        controller.fired().await;
        assert!(!controller.is_scheduled());
    }

    proptest! {
        #[test]
        fn backoff_never_decreases(base_ms in 1u64..10_000, attempt in 1u32..64) {
            let policy = policy(64, base_ms);
            prop_assert!(policy.backoff_delay(attempt + 1) >= policy.backoff_delay(attempt));
        }

        #[test]
        fn decision_respects_ceiling(max in 0u32..20, made in 0u32..40) {
            let decision = policy(max, 10).decide(made, false);
            match decision {
                ReconnectionDecision::Proceed { attempt, .. } => {
                    prop_assert!(made < max);
                    prop_assert_eq!(attempt, made + 1);
                }
                ReconnectionDecision::AbortMaxAttemptsExceeded => prop_assert!(made >= max),
                ReconnectionDecision::AbortDestroyed => prop_assert!(false, "not destroyed"),
            }
        }
    }
}
