//! Readiness gate: retry with exponential backoff bounded by elapsed time
//!
//! A probe is invoked repeatedly, with growing pauses in between, until it
//! succeeds or the elapsed-time budget is spent. There is no attempt cap.
//!
//! # Example
//!
//! ```rust,ignore
//! use pgtest::retry::{BackoffConfig, retry};
//!
//! let config = BackoffConfig::steady_state();
//! retry(&config, || async { conn.ping().await }).await?;
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Exponential backoff parameters for the readiness gate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay before the second attempt in milliseconds (default: 100ms)
    #[serde(default = "default_initial_interval")]
    pub initial_interval_ms: u64,

    /// Ceiling for a single pause in milliseconds (default: 5000ms)
    #[serde(default = "default_max_interval")]
    pub max_interval_ms: u64,

    /// Growth factor between pauses (default: 2.0)
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Total time budget in milliseconds (default: 10000ms)
    #[serde(default = "default_max_elapsed")]
    pub max_elapsed_ms: u64,

    /// Randomize pauses (default: false)
    #[serde(default)]
    pub jitter_enabled: bool,

    /// Maximum jitter factor (0.0 to 1.0, default: 0.1 = 10%)
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

const fn default_initial_interval() -> u64 {
    100
}

pub(crate) const fn default_max_interval() -> u64 {
    5_000
}

const fn default_multiplier() -> f64 {
    2.0
}

const fn default_max_elapsed() -> u64 {
    10_000
}

const fn default_jitter_factor() -> f64 {
    0.1
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: default_initial_interval(),
            max_interval_ms: default_max_interval(),
            multiplier: default_multiplier(),
            max_elapsed_ms: default_max_elapsed(),
            jitter_enabled: false,
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl BackoffConfig {
    /// Create a backoff configuration with custom parameters
    #[must_use]
    pub const fn new(
        initial_interval_ms: u64,
        max_interval_ms: u64,
        multiplier: f64,
        max_elapsed_ms: u64,
    ) -> Self {
        Self {
            initial_interval_ms,
            max_interval_ms,
            multiplier,
            max_elapsed_ms,
            jitter_enabled: false,
            jitter_factor: 0.1,
        }
    }

    /// Budget for an already running database (10s)
    #[must_use]
    pub const fn steady_state() -> Self {
        Self::new(100, 5_000, 2.0, 10_000)
    }

    /// Budget for a freshly created container: image pull plus initdb (120s)
    #[must_use]
    pub const fn cold_start() -> Self {
        Self::new(100, 5_000, 2.0, 120_000)
    }

    /// Replace the total time budget
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed_ms = max_elapsed.as_millis() as u64;
        self
    }

    /// Enable randomized pauses
    #[must_use]
    pub const fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter_enabled = true;
        self.jitter_factor = factor;
        self
    }

    /// Total time budget as a `Duration`
    #[must_use]
    pub const fn max_elapsed(&self) -> Duration {
        Duration::from_millis(self.max_elapsed_ms)
    }

    /// Calculate the pause after a given failed attempt (0-indexed)
    ///
    /// delay = initial_interval * multiplier^attempt, capped at max_interval.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_wrap,
        clippy::cast_sign_loss,
        clippy::cast_possible_truncation
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let base_delay = (self.initial_interval_ms as f64) * self.multiplier.powi(exponent);
        let capped_delay = base_delay.min(self.max_interval_ms as f64);

        let final_delay = if self.jitter_enabled && self.jitter_factor > 0.0 {
            let jitter_range = capped_delay * self.jitter_factor;
            let jitter = rand::rng().random_range(-jitter_range..=jitter_range);
            (capped_delay + jitter).clamp(0.0, self.max_interval_ms as f64)
        } else {
            capped_delay
        };

        Duration::from_millis(final_delay as u64)
    }
}

/// Trait for errors that can be checked for retryability
pub trait Retryable {
    /// Returns true if another attempt may succeed
    fn is_retryable(&self) -> bool;
}

/// Why the readiness gate gave up
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// The elapsed-time budget was spent
    #[error("gave up after {attempts} attempts in {elapsed:?}: {last_error}")]
    TimedOut {
        attempts: u32,
        elapsed: Duration,
        last_error: E,
    },

    /// The probe failed in a way another attempt cannot fix
    #[error("non-retryable failure: {0}")]
    Permanent(E),
}

impl<E> RetryError<E> {
    /// The probe error that ended the loop
    pub fn into_inner(self) -> E {
        match self {
            Self::TimedOut { last_error, .. } => last_error,
            Self::Permanent(e) => e,
        }
    }

    /// True if the budget was exhausted
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

/// Retry result containing either success or the reason the gate gave up
#[derive(Debug)]
pub struct RetryResult<T, E> {
    /// The result of the operation
    pub result: Result<T, RetryError<E>>,
    /// Number of attempts made (1 = no retries, 2 = one retry, etc.)
    pub attempts: u32,
    /// Total time spent including pauses
    pub total_duration: Duration,
}

impl<T, E> RetryResult<T, E> {
    /// Check if the operation succeeded
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    /// Check if the operation failed
    #[must_use]
    pub const fn is_err(&self) -> bool {
        self.result.is_err()
    }

    /// Convert to standard Result, discarding metadata
    pub fn into_result(self) -> Result<T, RetryError<E>> {
        self.result
    }
}

/// Invoke `probe` until it succeeds or `config.max_elapsed_ms` is spent
///
/// Pauses never extend past the budget. Once the budget is reached one last
/// attempt is made, so a timeout is never reported early.
#[allow(clippy::cast_possible_truncation)]
pub async fn with_retry<F, Fut, T, E>(config: &BackoffConfig, mut probe: F) -> RetryResult<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let start = Instant::now();
    let budget = config.max_elapsed();
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        match probe().await {
            Ok(value) => {
                if attempts > 1 {
                    debug!(
                        attempts = attempts,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Probe succeeded after retries"
                    );
                }
                return RetryResult {
                    result: Ok(value),
                    attempts,
                    total_duration: start.elapsed(),
                };
            },
            Err(err) => {
                if !err.is_retryable() {
                    debug!(
                        attempts = attempts,
                        error = %err,
                        "Probe failed with non-retryable error"
                    );
                    return RetryResult {
                        result: Err(RetryError::Permanent(err)),
                        attempts,
                        total_duration: start.elapsed(),
                    };
                }

                let elapsed = start.elapsed();
                if elapsed >= budget {
                    warn!(
                        attempts = attempts,
                        elapsed_ms = elapsed.as_millis() as u64,
                        error = %err,
                        "Probe still failing, budget exhausted"
                    );
                    return RetryResult {
                        result: Err(RetryError::TimedOut {
                            attempts,
                            elapsed,
                            last_error: err,
                        }),
                        attempts,
                        total_duration: elapsed,
                    };
                }

                let delay = config
                    .delay_for_attempt(attempts - 1)
                    .min(budget.saturating_sub(elapsed));
                debug!(
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Probe failed, retrying"
                );

                tokio::time::sleep(delay).await;
            },
        }
    }
}

/// Like [`with_retry`], returning only the Result
pub async fn retry<F, Fut, T, E>(config: &BackoffConfig, probe: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    with_retry(config, probe).await.into_result()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Clone)]
    struct TestError {
        message: String,
        retryable: bool,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.message)
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            self.retryable
        }
    }

    fn refused() -> TestError {
        TestError {
            message: "connection refused".to_string(),
            retryable: true,
        }
    }

    #[test]
    fn config_default_values() {
        let config = BackoffConfig::default();
        assert_eq!(config.initial_interval_ms, 100);
        assert_eq!(config.max_interval_ms, 5_000);
        assert!((config.multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.max_elapsed_ms, 10_000);
        assert!(!config.jitter_enabled);
    }

    #[test]
    fn presets_differ_only_in_budget() {
        let steady = BackoffConfig::steady_state();
        let cold = BackoffConfig::cold_start();
        assert_eq!(steady.max_elapsed(), Duration::from_secs(10));
        assert_eq!(cold.max_elapsed(), Duration::from_secs(120));
        assert_eq!(steady.max_interval_ms, cold.max_interval_ms);
    }

    #[test]
    fn delay_calculation() {
        let config = BackoffConfig::default();

        assert_eq!(config.delay_for_attempt(0).as_millis(), 100);
        assert_eq!(config.delay_for_attempt(1).as_millis(), 200);
        assert_eq!(config.delay_for_attempt(2).as_millis(), 400);
        assert_eq!(config.delay_for_attempt(3).as_millis(), 800);
    }

    #[test]
    fn delay_capped_at_max_interval() {
        let config = BackoffConfig::new(1000, 2000, 2.0, 60_000);

        assert_eq!(config.delay_for_attempt(0).as_millis(), 1000);
        assert_eq!(config.delay_for_attempt(1).as_millis(), 2000);
        assert_eq!(config.delay_for_attempt(2).as_millis(), 2000);
        assert_eq!(config.delay_for_attempt(40).as_millis(), 2000);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let config = BackoffConfig::new(1000, 5000, 2.0, 60_000).with_jitter(0.2);

        for _ in 0..50 {
            let delay = config.delay_for_attempt(0).as_millis();
            assert!((800..=1200).contains(&delay), "delay {delay} out of range");
        }
        for _ in 0..50 {
            assert!(config.delay_for_attempt(10).as_millis() <= 5000);
        }
    }

    #[test]
    fn config_deserialization_fills_defaults() {
        let json = r#"{"max_elapsed_ms":2500}"#;
        let config: BackoffConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.max_elapsed_ms, 2500);
        assert_eq!(config.initial_interval_ms, 100);
        assert_eq!(config.max_interval_ms, 5_000);
    }

    #[tokio::test]
    async fn succeeds_first_try() {
        let config = BackoffConfig::default();
        let call_count = Arc::new(AtomicU32::new(0));

        let result = with_retry(&config, || {
            let count = Arc::clone(&call_count);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TestError>(42)
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(result.attempts, 1);
        assert_eq!(result.into_result().unwrap(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_after_k_failures_within_budget() {
        let config = BackoffConfig::new(10, 50, 2.0, 2_000);
        let call_count = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let result = with_retry(&config, || {
            let count = Arc::clone(&call_count);
            async move {
                let calls = count.fetch_add(1, Ordering::SeqCst) + 1;
                if calls <= 4 { Err(refused()) } else { Ok("ready") }
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(result.attempts, 5);
        assert!(started.elapsed() < config.max_elapsed());
        assert_eq!(call_count.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn always_failing_probe_times_out_near_budget() {
        let config = BackoffConfig::new(20, 100, 2.0, 400);
        let started = Instant::now();

        let result = with_retry(&config, || async { Err::<(), _>(refused()) }).await;
        let wall = started.elapsed();

        assert!(result.is_err());
        assert!(result.attempts > 1);
        let err = result.into_result().unwrap_err();
        assert!(err.is_timeout());
        assert!(wall >= Duration::from_millis(400), "gave up early: {wall:?}");
        assert!(wall < Duration::from_millis(1_400), "overshot budget: {wall:?}");
        assert_eq!(err.into_inner().message, "connection refused");
    }

    #[tokio::test]
    async fn non_retryable_error_stops_immediately() {
        let config = BackoffConfig::default();
        let call_count = Arc::new(AtomicU32::new(0));

        let result = with_retry(&config, || {
            let count = Arc::clone(&call_count);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(TestError {
                    message: "invalid connection string".to_string(),
                    retryable: false,
                })
            }
        })
        .await;

        assert_eq!(result.attempts, 1);
        assert!(matches!(result.result, Err(RetryError::Permanent(_))));
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_budget_still_makes_one_attempt() {
        let config = BackoffConfig::default().with_max_elapsed(Duration::ZERO);

        let result = with_retry(&config, || async { Err::<(), _>(refused()) }).await;

        assert_eq!(result.attempts, 1);
        assert!(result.into_result().unwrap_err().is_timeout());
    }

    #[tokio::test]
    async fn retry_convenience_function() {
        let config = BackoffConfig::steady_state();

        let result: Result<i32, RetryError<TestError>> = retry(&config, || async { Ok(42) }).await;

        assert_eq!(result.unwrap(), 42);
    }
}
