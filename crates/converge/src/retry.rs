//! Retry logic with exponential backoff for transient provider errors.

use crate::error::ProviderError;
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with custom settings.
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            ..Default::default()
        }
    }

    /// Calculate the delay after a given failed attempt (0-indexed).
    ///
    /// Never negative, whatever the factor.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = delay.min(self.max_delay.as_secs_f64()).max(0.0);
        Duration::from_secs_f64(capped)
    }

    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// Callback trait for retry progress notifications.
pub trait RetryCallback {
    /// Called before sleeping ahead of the next attempt.
    ///
    /// `attempt` is the 1-indexed attempt that just failed.
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &ProviderError, delay: Duration);
}

/// The error that ended a retried operation
#[derive(Debug, Clone)]
pub struct Exhausted {
    pub error: ProviderError,
    /// Attempts made, including the failing one
    pub attempts: u32,
}

/// Execute an operation with retry logic.
///
/// Transient errors are retried with exponential backoff until
/// `max_attempts` is reached. Other errors return immediately.
pub fn with_retry<T, F>(
    config: &RetryConfig,
    callback: Option<&dyn RetryCallback>,
    mut operation: F,
) -> Result<T, Exhausted>
where
    F: FnMut() -> Result<T, ProviderError>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let error = match operation() {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };
        attempt += 1;

        if !error.is_retryable() || attempt >= max_attempts {
            return Err(Exhausted {
                error,
                attempts: attempt,
            });
        }

        let delay = config.delay_for_attempt(attempt - 1);
        log::warn!(
            "Attempt {}/{} failed: {}. Retrying in {:?}",
            attempt,
            max_attempts,
            error,
            delay
        );
        if let Some(cb) = callback {
            cb.on_retry(attempt, max_attempts, &error, delay);
        }

        thread::sleep(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(1),
            backoff_factor: 1.0,
            max_delay: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_with_retry_success_first_try() {
        let result = with_retry(&RetryConfig::no_retry(), None, || Ok::<_, ProviderError>(42));
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn test_with_retry_rejected_error_not_retried() {
        let attempts = Cell::new(0);
        let result: Result<(), _> = with_retry(&fast(5), None, || {
            attempts.set(attempts.get() + 1);
            Err(ProviderError::rejected("invalid server_type"))
        });

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 1);
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn test_with_retry_eventual_success() {
        let attempts = Cell::new(0);
        let result = with_retry(&fast(3), None, || {
            let current = attempts.get();
            attempts.set(current + 1);
            if current < 2 {
                Err(ProviderError::transient("timeout"))
            } else {
                Ok(42)
            }
        });

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn test_with_retry_all_attempts_fail() {
        let attempts = Cell::new(0);
        let result: Result<(), _> = with_retry(&fast(3), None, || {
            attempts.set(attempts.get() + 1);
            Err(ProviderError::transient("rate limited"))
        });

        assert_eq!(result.unwrap_err().attempts, 3);
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn test_callback_invoked_between_attempts() {
        struct Counting(Cell<u32>);
        impl RetryCallback for Counting {
            fn on_retry(&self, _: u32, _: u32, _: &ProviderError, _: Duration) {
                self.0.set(self.0.get() + 1);
            }
        }

        let callback = Counting(Cell::new(0));
        let _: Result<(), _> = with_retry(&fast(3), Some(&callback), || {
            Err(ProviderError::transient("timeout"))
        });

        // Not after the final attempt
        assert_eq!(callback.0.get(), 2);
    }

    #[test]
    fn test_delay_for_attempt() {
        let config = RetryConfig::new(5, Duration::from_secs(2), 2.0);
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(16));
        assert_eq!(config.delay_for_attempt(4), Duration::from_secs(30));
    }

    #[test]
    fn test_delay_never_negative() {
        let negative = RetryConfig::new(5, Duration::from_secs(2), -1.0);
        assert_eq!(negative.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(negative.delay_for_attempt(2), Duration::from_secs(2));

        let nan = RetryConfig::new(5, Duration::ZERO, f64::NAN);
        assert!(nan.delay_for_attempt(1) <= Duration::from_secs(30));
    }
}
