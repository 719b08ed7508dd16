//! Saga runtime settings loaded from environment variables.

use std::time::Duration;

use crate::audit::DEFAULT_AUDIT_CAPACITY;
use crate::retry::RetryPolicy;

/// Retry and reconciliation settings.
///
/// Reads from environment variables:
/// - `SAGA_MAX_ATTEMPTS`: attempts per step (default: `3`)
/// - `SAGA_RETRY_DELAY_MS`: base delay of the linear backoff (default: `100`)
/// - `RECONCILE_MAX_ATTEMPTS`: wallet retries before manual review (default: `5`)
/// - `SAGA_AUDIT_CAPACITY`: audit records kept in memory (default: `10000`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SagaConfig {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub reconcile_max_attempts: u32,
    pub audit_capacity: usize,
}

impl SagaConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_attempts: parse_var("SAGA_MAX_ATTEMPTS").unwrap_or(defaults.max_attempts),
            retry_delay: parse_var("SAGA_RETRY_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_delay),
            reconcile_max_attempts: parse_var("RECONCILE_MAX_ATTEMPTS")
                .unwrap_or(defaults.reconcile_max_attempts),
            audit_capacity: parse_var("SAGA_AUDIT_CAPACITY")
                .filter(|capacity: &usize| *capacity > 0)
                .unwrap_or(defaults.audit_capacity),
        }
    }

    /// The saga-level retry policy every spin saga starts from.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.retry_delay)
    }
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            max_attempts: RetryPolicy::DEFAULT_MAX_ATTEMPTS,
            retry_delay: RetryPolicy::DEFAULT_DELAY,
            reconcile_max_attempts: 5,
            audit_capacity: DEFAULT_AUDIT_CAPACITY,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 4] = [
        "SAGA_MAX_ATTEMPTS",
        "SAGA_RETRY_DELAY_MS",
        "RECONCILE_MAX_ATTEMPTS",
        "SAGA_AUDIT_CAPACITY",
    ];

    fn clear() {
        for var in VARS {
            // SAFETY: env tests are serialized.
            unsafe { std::env::remove_var(var) };
        }
    }

    #[test]
    #[serial]
    fn test_defaults_without_env() {
        clear();
        assert_eq!(SagaConfig::from_env(), SagaConfig::default());
    }

    #[test]
    #[serial]
    fn test_reads_env_and_ignores_garbage() {
        clear();
        // SAFETY: env tests are serialized.
        unsafe {
            std::env::set_var("SAGA_MAX_ATTEMPTS", "5");
            std::env::set_var("SAGA_RETRY_DELAY_MS", "250");
            std::env::set_var("RECONCILE_MAX_ATTEMPTS", "many");
            std::env::set_var("SAGA_AUDIT_CAPACITY", "0");
        }

        let config = SagaConfig::from_env();
        clear();

        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.retry_delay, Duration::from_millis(250));
        assert_eq!(config.reconcile_max_attempts, 5);
        assert_eq!(config.audit_capacity, DEFAULT_AUDIT_CAPACITY);
    }

    #[test]
    fn test_policy_follows_config() {
        let config = SagaConfig {
            max_attempts: 4,
            retry_delay: Duration::from_millis(10),
            reconcile_max_attempts: 1,
            ..SagaConfig::default()
        };
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.delay_for(2), Duration::from_millis(20));
    }
}
