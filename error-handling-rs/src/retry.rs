//! # Retry Mechanism
//!
//! Bounded retries with exponential backoff and jitter. The policy is
//! generic over the error type so stage errors keep their own shape through
//! the retry loop instead of being flattened into [`crate::Error`].

use std::future::Future;
use std::time::{Duration, Instant};

use metrics::{histogram, increment_counter};
use rand::Rng;
use serde::{Serialize, Deserialize};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::types::{Error, ErrorKind};

/// The result of a retry operation
#[derive(Debug)]
pub enum RetryResult<T, E> {
    /// The operation succeeded on the given attempt (1-based)
    Success { value: T, attempts: usize },
    /// Every permitted attempt failed; `error` is the last failure
    Failure { error: E, attempts: usize },
}

/// A trait for errors that can be retried
pub trait RetryableError {
    /// Returns true if the error is transient and the operation might succeed on retry
    fn is_transient(&self) -> bool;

    /// Returns the suggested delay before retrying
    fn suggested_delay(&self) -> Option<Duration> {
        None
    }

    /// Error categorization used for metrics and backoff
    fn categorize(&self) -> RetryCategory {
        RetryCategory::Normal
    }
}

/// Categories of errors for different retry strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCategory {
    /// Standard transient error
    Normal,
    /// Rate limiting or throttling error
    RateLimit,
    /// Timeout
    Timeout,
    /// Server or upstream service error
    Server,
    /// Client error (likely not retriable)
    Client,
    /// Unavailable or maintenance
    Unavailable,
}

impl RetryCategory {
    fn as_str(&self) -> &'static str {
        match self {
            RetryCategory::Normal => "normal",
            RetryCategory::RateLimit => "rate_limit",
            RetryCategory::Timeout => "timeout",
            RetryCategory::Server => "server",
            RetryCategory::Client => "client",
            RetryCategory::Unavailable => "unavailable",
        }
    }
}

impl RetryableError for Error {
    fn is_transient(&self) -> bool {
        self.transient
    }

    fn suggested_delay(&self) -> Option<Duration> {
        self.context
            .get("retry-after")
            .and_then(|value| value.as_u64())
            .map(Duration::from_secs)
    }

    fn categorize(&self) -> RetryCategory {
        match self.kind {
            ErrorKind::Timeout => RetryCategory::Timeout,
            ErrorKind::External => RetryCategory::Server,
            ErrorKind::Unavailable => RetryCategory::Unavailable,
            ErrorKind::Validation | ErrorKind::Configuration => RetryCategory::Client,
            _ => RetryCategory::Normal,
        }
    }
}

/// Configuration for a retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one; 1 disables retries
    pub max_attempts: usize,

    /// Base duration for exponential backoff
    pub base_backoff: Duration,

    /// Maximum backoff time
    pub max_backoff: Duration,

    /// Jitter factor (0.0 - 1.0) to add randomness to backoff
    pub jitter_factor: f64,

    /// Whether to retry only transient errors
    pub retry_only_transient: bool,

    /// Whether to record metrics
    pub record_metrics: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            jitter_factor: 0.1,
            retry_only_transient: true,
            record_metrics: true,
        }
    }
}

/// A retry policy that determines how to handle retries
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,

    /// Name of the policy (for logs and metrics)
    name: String,
}

impl RetryPolicy {
    /// Creates a new retry policy with the given name and configuration
    pub fn new<S: Into<String>>(name: S, config: Option<RetryConfig>) -> Self {
        Self {
            config: config.unwrap_or_default(),
            name: name.into(),
        }
    }

    /// Checks whether another attempt is allowed after `attempt` (1-based) failed
    pub fn is_retryable<E: RetryableError>(&self, error: &E, attempt: usize) -> bool {
        if attempt >= self.config.max_attempts {
            return false;
        }

        if self.config.retry_only_transient && !error.is_transient() {
            return false;
        }

        true
    }

    /// Calculates the backoff duration before the attempt after `attempt`
    pub fn calculate_backoff<E: RetryableError>(&self, error: &E, attempt: usize) -> Duration {
        if let Some(delay) = error.suggested_delay() {
            return delay.min(self.config.max_backoff);
        }

        let base_ms = self.config.base_backoff.as_millis() as f64;
        let max_ms = self.config.max_backoff.as_millis() as f64;

        let exponent = attempt.saturating_sub(1) as f64;
        let multiplier: f64 = if error.categorize() == RetryCategory::RateLimit { 4.0 } else { 2.0 };
        let capped_backoff = (base_ms * multiplier.powf(exponent)).min(max_ms);

        // Jitter to avoid synchronized retries across requests
        let jitter_range = capped_backoff * self.config.jitter_factor.clamp(0.0, 1.0);
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..jitter_range)
        } else {
            0.0
        };

        Duration::from_millis((capped_backoff + jitter).max(0.0) as u64)
    }

    /// Runs `f` until it succeeds, the error is not retryable, or the attempt
    /// budget is spent. `f` receives the 1-based attempt number.
    pub async fn retry<F, Fut, T, E>(&self, operation_name: &str, mut f: F) -> RetryResult<T, E>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError + std::fmt::Display,
    {
        let start = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;
            match f(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(
                            policy = %self.name,
                            operation = %operation_name,
                            attempts = attempt,
                            "Operation succeeded after retries"
                        );
                    }
                    self.record_metrics(attempt, true, None, start.elapsed());
                    return RetryResult::Success { value, attempts: attempt };
                }
                Err(error) => {
                    if !self.is_retryable(&error, attempt) {
                        warn!(
                            policy = %self.name,
                            operation = %operation_name,
                            attempts = attempt,
                            error = %error,
                            "Operation failed, no attempts left"
                        );
                        self.record_metrics(attempt, false, Some(error.categorize()), start.elapsed());
                        return RetryResult::Failure { error, attempts: attempt };
                    }

                    let backoff = self.calculate_backoff(&error, attempt);
                    debug!(
                        policy = %self.name,
                        operation = %operation_name,
                        attempt = attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %error,
                        "Retrying after failure"
                    );
                    if self.config.record_metrics {
                        increment_counter!("retry_attempts_total", "policy" => self.name.clone());
                    }
                    sleep(backoff).await;
                }
            }
        }
    }

    fn record_metrics(&self, attempts: usize, success: bool, category: Option<RetryCategory>, elapsed: Duration) {
        if !self.config.record_metrics {
            return;
        }

        let outcome = if success { "success" } else { "failure" };
        increment_counter!("retry_operations_total", "policy" => self.name.clone(), "outcome" => outcome);
        if let Some(category) = category {
            increment_counter!(
                "retry_errors_total",
                "policy" => self.name.clone(),
                "category" => category.as_str()
            );
        }
        histogram!("retry_attempts", attempts as f64, "policy" => self.name.clone());
        histogram!("retry_duration_ms", elapsed.as_millis() as f64, "policy" => self.name.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct Flaky(bool);

    impl std::fmt::Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "flaky(transient={})", self.0)
        }
    }

    impl RetryableError for Flaky {
        fn is_transient(&self) -> bool {
            self.0
        }
    }

    fn quick(attempts: usize) -> RetryPolicy {
        RetryPolicy::new(
            "test",
            Some(RetryConfig {
                max_attempts: attempts,
                base_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(5),
                jitter_factor: 0.0,
                retry_only_transient: true,
                record_metrics: false,
            }),
        )
    }

    #[tokio::test]
    async fn stops_after_attempt_budget() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result: RetryResult<(), Flaky> = quick(2)
            .retry("op", move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(Flaky(true))
                }
            })
            .await;

        assert!(matches!(result, RetryResult::Failure { attempts: 2, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        let result: RetryResult<(), Flaky> =
            tokio_test::block_on(quick(5).retry("op", |_| async { Err(Flaky(false)) }));
        assert!(matches!(result, RetryResult::Failure { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn succeeds_on_later_attempt() {
        let result: RetryResult<usize, Flaky> = quick(3)
            .retry("op", |attempt| async move {
                if attempt < 3 { Err(Flaky(true)) } else { Ok(attempt) }
            })
            .await;
        assert!(matches!(result, RetryResult::Success { value: 3, attempts: 3 }));
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let policy = RetryPolicy::new(
            "backoff",
            Some(RetryConfig {
                base_backoff: Duration::from_millis(100),
                max_backoff: Duration::from_millis(350),
                jitter_factor: 0.0,
                ..Default::default()
            }),
        );
        let err = Flaky(true);
        assert_eq!(policy.calculate_backoff(&err, 1), Duration::from_millis(100));
        assert_eq!(policy.calculate_backoff(&err, 2), Duration::from_millis(200));
        assert_eq!(policy.calculate_backoff(&err, 3), Duration::from_millis(350));
    }

    #[test]
    fn single_attempt_budget_never_retries() {
        assert!(!quick(1).is_retryable(&Flaky(true), 1));
        assert!(quick(2).is_retryable(&Flaky(true), 1));
    }

    #[test]
    fn rate_limited_errors_back_off_faster() {
        #[derive(Debug)]
        struct Throttled;
        impl RetryableError for Throttled {
            fn is_transient(&self) -> bool {
                true
            }
            fn categorize(&self) -> RetryCategory {
                RetryCategory::RateLimit
            }
        }

        let policy = RetryPolicy::new(
            "throttle",
            Some(RetryConfig {
                base_backoff: Duration::from_millis(10),
                max_backoff: Duration::from_secs(1),
                jitter_factor: 0.0,
                ..Default::default()
            }),
        );
        assert_eq!(policy.calculate_backoff(&Throttled, 3), Duration::from_millis(160));
    }
}
