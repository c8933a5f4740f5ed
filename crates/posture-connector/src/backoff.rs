//! Bounded exponential backoff policy shared by provider clients.

use std::time::Duration;

/// Retry policy for a single page request. Exhausting the budget fails the
/// phase, not the run.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum retry attempts per request.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles each attempt.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based). A provider-supplied
    /// `Retry-After` value wins over the computed backoff.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, retry_after_secs: Option<u64>) -> Duration {
        if let Some(secs) = retry_after_secs {
            return Duration::from_secs(secs).min(self.max_delay);
        }
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    /// Whether another retry is allowed after `attempt` failures.
    #[must_use]
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_for(0, None), Duration::from_secs(1));
        assert_eq!(p.delay_for(1, None), Duration::from_secs(2));
        assert_eq!(p.delay_for(2, None), Duration::from_secs(4));
        assert_eq!(p.delay_for(10, None), Duration::from_secs(30));
    }

    #[test]
    fn retry_after_takes_precedence() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_for(0, Some(7)), Duration::from_secs(7));
        assert_eq!(p.delay_for(0, Some(600)), Duration::from_secs(30));
    }

    #[test]
    fn retry_budget_is_bounded() {
        let p = RetryPolicy::default();
        assert!(p.should_retry(3));
        assert!(!p.should_retry(4));
    }
}
