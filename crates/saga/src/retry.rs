//! Step retry policy.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::SagaError;

type RetryPredicate = Arc<dyn Fn(&SagaError) -> bool + Send + Sync>;

/// Decides whether, and after how long, a failed step attempt is retried.
///
/// Transient errors always qualify. Any other error is retried only if the
/// predicate installed with [`RetryPolicy::retry_if`] accepts it. Delays grow
/// linearly: attempt `n` waits `delay * n` before attempt `n + 1`.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
    retry_if: Option<RetryPredicate>,
}

impl RetryPolicy {
    /// Default number of attempts per step.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    /// Default base delay between attempts.
    pub const DEFAULT_DELAY: Duration = Duration::from_millis(100);

    /// Creates a policy. `max_attempts` is clamped to at least one.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            retry_if: None,
        }
    }

    /// A single attempt, for steps that must fail fast.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Also retries non-transient errors accepted by `predicate`.
    pub fn retry_if(
        mut self,
        predicate: impl Fn(&SagaError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.retry_if = Some(Arc::new(predicate));
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Returns true if `error` may be retried.
    pub fn is_retryable(&self, error: &SagaError) -> bool {
        error.is_transient() || self.retry_if.as_ref().is_some_and(|accept| accept(error))
    }

    /// Returns true if another attempt should follow the failed `attempt` (1-based).
    pub fn should_retry(&self, error: &SagaError, attempt: u32) -> bool {
        attempt < self.max_attempts && self.is_retryable(error)
    }

    /// Returns the pause after the failed `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.delay.saturating_mul(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ATTEMPTS, Self::DEFAULT_DELAY)
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("delay", &self.delay)
            .field("retry_if", &self.retry_if.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_linear_backoff() {
        let policy = RetryPolicy::new(4, Duration::from_millis(50));
        assert_eq!(policy.delay_for(1), Duration::from_millis(50));
        assert_eq!(policy.delay_for(2), Duration::from_millis(100));
        assert_eq!(policy.delay_for(3), Duration::from_millis(150));
    }

    #[test]
    fn test_retries_transient_until_exhausted() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let error = SagaError::Unavailable("wallet".into());
        assert!(policy.should_retry(&error, 1));
        assert!(policy.should_retry(&error, 2));
        assert!(!policy.should_retry(&error, 3));
    }

    #[test]
    fn test_does_not_retry_business_errors_by_default() {
        let policy = RetryPolicy::default();
        let error = SagaError::GameUnavailable("g".into());
        assert!(!policy.should_retry(&error, 1));
    }

    #[test]
    fn test_predicate_enumerates_extra_retryable_errors() {
        let policy =
            RetryPolicy::default().retry_if(|e| matches!(e, SagaError::Wallet(_)));
        assert!(policy.should_retry(&SagaError::Wallet("busy".into()), 1));
        assert!(!policy.should_retry(&SagaError::RoundFinished("r".into()), 1));
    }

    #[test]
    fn test_no_retry_is_single_attempt() {
        let policy = RetryPolicy::no_retry();
        assert_eq!(policy.max_attempts(), 1);
        assert!(!policy.should_retry(&SagaError::Timeout("t".into()), 1));
    }

    #[test]
    fn test_zero_attempts_clamped() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts(), 1);
    }
}
