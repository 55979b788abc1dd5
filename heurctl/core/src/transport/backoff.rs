//! Reconnection Backoff
//!
//! Bounded exponential backoff for the reconnecting transport. Pure state,
//! no timers: the supervisor asks what to do after each close and sleeps
//! for the returned delay itself.

use std::time::Duration;

use super::traits::CloseKind;

/// Reconnection limits
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum reconnection attempts
    pub max_retries: u32,
    /// Delay before the first reconnection attempt
    pub initial_delay: Duration,
}

impl RetryPolicy {
    /// Delay before reconnection attempt `attempt` (0-based)
    ///
    /// `initial_delay * 2^attempt`, saturating.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(factor)
    }
}

/// What to do after a connection closed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Reconnect after `delay`; `attempt` is the 1-based retry number
    Reconnect {
        /// How long to wait
        delay: Duration,
        /// Which retry this is
        attempt: u32,
    },
    /// The close was clean; do not reconnect
    Stop,
    /// The retry budget is spent; surface CLOSED terminally
    Exhausted,
}

/// Attempt counter for one transport lifetime
#[derive(Clone, Debug)]
pub struct RetryState {
    policy: RetryPolicy,
    attempt: u32,
}

impl RetryState {
    /// Fresh state with zero attempts
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Retries scheduled since the last successful open
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay the next unclean close would schedule
    pub fn next_delay(&self) -> Duration {
        self.policy.delay_for_attempt(self.attempt)
    }

    /// A connection opened successfully
    pub fn on_open(&mut self) {
        self.attempt = 0;
    }

    /// A connection (or connection attempt) ended
    pub fn on_close(&mut self, kind: CloseKind) -> RetryDecision {
        if kind == CloseKind::Clean {
            return RetryDecision::Stop;
        }
        if self.attempt >= self.policy.max_retries {
            return RetryDecision::Exhausted;
        }
        let delay = self.next_delay();
        self.attempt += 1;
        RetryDecision::Reconnect {
            delay,
            attempt: self.attempt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_retries: u32, initial_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(initial_ms),
        }
    }

    #[test]
    fn test_delays_double_per_attempt() {
        let mut state = RetryState::new(policy(5, 1000));
        let delays: Vec<u64> = (0..5)
            .map(|_| match state.on_close(CloseKind::Unclean) {
                RetryDecision::Reconnect { delay, .. } => delay.as_millis() as u64,
                other => panic!("unexpected decision {other:?}"),
            })
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
        assert_eq!(state.on_close(CloseKind::Unclean), RetryDecision::Exhausted);
        assert_eq!(state.attempt(), 5);
    }

    #[test]
    fn test_third_retry_waits_four_seconds_and_open_resets() {
        let mut state = RetryState::new(policy(5, 1000));
        state.on_close(CloseKind::Unclean);
        state.on_close(CloseKind::Unclean);
        assert_eq!(state.attempt(), 2);

        assert_eq!(
            state.on_close(CloseKind::Unclean),
            RetryDecision::Reconnect {
                delay: Duration::from_millis(4000),
                attempt: 3,
            }
        );

        state.on_open();
        assert_eq!(state.attempt(), 0);
        assert_eq!(state.next_delay(), Duration::from_millis(1000));
    }

    #[test]
    fn test_clean_close_never_reconnects() {
        let mut state = RetryState::new(policy(5, 1000));
        assert_eq!(state.on_close(CloseKind::Clean), RetryDecision::Stop);
        assert_eq!(state.attempt(), 0);
    }

    #[test]
    fn test_zero_budget_is_exhausted_immediately() {
        let mut state = RetryState::new(policy(0, 1000));
        assert_eq!(state.on_close(CloseKind::Unclean), RetryDecision::Exhausted);
    }

    #[test]
    fn test_attempt_never_exceeds_budget() {
        let mut state = RetryState::new(policy(3, 10));
        for _ in 0..20 {
            state.on_close(CloseKind::Unclean);
            assert!(state.attempt() <= 3);
        }
    }

    #[test]
    fn test_delay_saturates() {
        let p = policy(u32::MAX, 1000);
        assert_eq!(p.delay_for_attempt(64), Duration::from_millis(1000).saturating_mul(u32::MAX));
    }
}
