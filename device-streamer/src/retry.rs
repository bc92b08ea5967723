use crate::config::RetryConfig;
use crate::error::{Result, StreamError};
use std::time::Duration;
use tracing::warn;

/// Bounded exponential backoff for retryable stream operations
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Calculate backoff delay with jitter for the given retry (0-based)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base_delay_ms = self.config.base_delay.as_millis() as f64;
        let delay_ms = base_delay_ms * self.config.backoff_multiplier.powi(attempt as i32);
        let delay_ms = delay_ms.min(self.config.max_delay.as_millis() as f64);

        let jitter = delay_ms * self.config.jitter_factor * (rand::random::<f64>() - 0.5) * 2.0;
        let final_delay_ms = (delay_ms + jitter).max(0.0) as u64;

        Duration::from_millis(final_delay_ms)
    }

    /// Decide what to do after `error` ended an attempt.
    ///
    /// `retries` is the number of retries already made for this operation.
    /// Returns the delay to wait before retrying, or the error to give up
    /// with: the original one if it is not retryable, `RetryExhausted` once
    /// the budget is spent.
    pub fn on_failure(&self, retries: u32, what: &str, error: StreamError) -> Result<Duration> {
        if !error.is_retryable() {
            return Err(error);
        }
        if retries >= self.config.max_retries {
            return Err(StreamError::RetryExhausted {
                attempts: retries + 1,
                last_error: error.to_string(),
            });
        }

        let delay = self.backoff_delay(retries);
        warn!(
            "{} failed: {} (retry {}/{} in {:?})",
            what,
            error,
            retries + 1,
            self.config.max_retries,
            delay
        );
        Ok(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{MessageType, TransportError};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        })
    }

    fn send_failure() -> StreamError {
        StreamError::TransportSendFailure(TransportError::SendFailed {
            message_type: MessageType::StreamDataRequest,
            reason: "simulated".to_string(),
        })
    }

    #[test]
    fn test_backoff_grows_and_is_capped() {
        let policy = fast_policy(5);
        assert_eq!(policy.backoff_delay(0), Duration::from_millis(1));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(2));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(4));
        assert_eq!(policy.backoff_delay(6), Duration::from_millis(4));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::new(RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        });
        for _ in 0..100 {
            let delay = policy.backoff_delay(0);
            assert!(delay >= Duration::from_millis(900));
            assert!(delay <= Duration::from_millis(1100));
        }
    }

    #[test]
    fn test_retryable_failures_get_a_delay() {
        let policy = fast_policy(3);
        assert_eq!(
            policy.on_failure(0, "pull", send_failure()).unwrap(),
            Duration::from_millis(1)
        );
        assert_eq!(
            policy.on_failure(2, "pull", send_failure()).unwrap(),
            Duration::from_millis(4)
        );
    }

    #[test]
    fn test_budget_exhaustion() {
        let policy = fast_policy(2);
        let result = policy.on_failure(2, "push", send_failure());
        assert!(matches!(
            result,
            Err(StreamError::RetryExhausted { attempts: 3, .. })
        ));
    }

    #[test]
    fn test_non_retryable_error_is_returned_unchanged() {
        let policy = fast_policy(5);
        let result = policy.on_failure(
            0,
            "create",
            StreamError::StreamCreateFailure {
                reason: "quota exceeded".to_string(),
            },
        );
        assert!(matches!(result, Err(StreamError::StreamCreateFailure { .. })));

        let result = policy.on_failure(0, "pull", StreamError::Cancelled);
        assert!(matches!(result, Err(StreamError::Cancelled)));
    }
}
