//! Shared backoff delay for a governor.

use std::time::Duration;

/// Delay applied between dispatches. Doubles on every rate limit, capped,
/// and drops back to base after any success.
///
/// Invariant: `0 < current <= cap`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffState {
    base: Duration,
    cap: Duration,
    current: Duration,
}

impl BackoffState {
    pub fn new(base: Duration, cap: Duration) -> Self {
        let base = base.max(Duration::from_millis(1));
        let cap = cap.max(base);
        Self {
            base,
            cap,
            current: base,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn cap(&self) -> Duration {
        self.cap
    }

    /// Whether the delay is above base (at least one unanswered rate limit).
    pub fn in_backoff(&self) -> bool {
        self.current > self.base
    }

    /// Double the delay after a rate limit. Returns the new delay.
    pub fn escalate(&mut self) -> Duration {
        self.current = self.current.saturating_mul(2).min(self.cap);
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governor::backoff_delay;

    #[test]
    fn test_escalation_matches_backoff_delay() {
        let mut state = BackoffState::new(Duration::from_millis(1000), Duration::from_millis(30_000));
        assert_eq!(state.current(), backoff_delay(0, 1000, 30_000));

        for k in 1..=8 {
            let delay = state.escalate();
            assert_eq!(delay, backoff_delay(k, 1000, 30_000), "after {} rate limits", k);
            assert!(delay <= state.cap());
        }
        assert_eq!(state.current(), Duration::from_millis(30_000));
        assert!(state.in_backoff());
    }

    #[test]
    fn test_reset_returns_to_base() {
        let mut state = BackoffState::new(Duration::from_millis(200), Duration::from_secs(5));
        state.escalate();
        state.escalate();
        assert_eq!(state.current(), Duration::from_millis(800));

        state.reset();
        assert_eq!(state.current(), Duration::from_millis(200));
        assert!(!state.in_backoff());
    }

    #[test]
    fn test_degenerate_bounds_stay_positive() {
        let state = BackoffState::new(Duration::ZERO, Duration::ZERO);
        assert!(state.current() > Duration::ZERO);
        assert_eq!(state.cap(), state.base());
    }
}
