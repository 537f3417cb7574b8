use std::time::Duration;

/// Round-based retry policy.
///
/// One round tries every endpoint once. Between rounds the caller sleeps
/// `retry_delay * 2^round`; there is no sleep after the last round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of full rounds over the endpoint pool.
    pub max_retries: u32,
    /// Base delay for the between-round backoff.
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
        }
    }

    /// Backoff to sleep after `round` (0-based) has failed, or None after the last round.
    pub fn backoff_after(&self, round: u32) -> Option<Duration> {
        if round.saturating_add(1) >= self.max_retries {
            return None;
        }
        let exp = 1u32 << round.min(16);
        Some(self.retry_delay.saturating_mul(exp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_round() {
        let p = RetryPolicy::new(4, Duration::from_millis(2000));
        assert_eq!(p.backoff_after(0), Some(Duration::from_millis(2000)));
        assert_eq!(p.backoff_after(1), Some(Duration::from_millis(4000)));
        assert_eq!(p.backoff_after(2), Some(Duration::from_millis(8000)));
        assert_eq!(p.backoff_after(3), None);
    }

    #[test]
    fn no_backoff_after_last_round() {
        let p = RetryPolicy::new(1, Duration::from_secs(1));
        assert_eq!(p.backoff_after(0), None);
        let zero = RetryPolicy::new(0, Duration::from_secs(1));
        assert_eq!(zero.backoff_after(0), None);
    }

    #[test]
    fn huge_round_does_not_overflow() {
        let p = RetryPolicy::new(u32::MAX, Duration::from_secs(60));
        assert!(p.backoff_after(40).is_some());
    }
}
