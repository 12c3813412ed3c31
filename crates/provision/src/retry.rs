//! Retry logic with exponential backoff for retryable steps.

use crate::context::CancelToken;
use crate::error::StepError;
use std::thread;
use std::time::{Duration, Instant};

/// Backoff policy for retryable steps
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
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
            max_delay: Duration::from_secs(60),
        }
    }

    /// Calculate the delay after a failed attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// Callback for retry progress notifications.
pub trait RetryCallback {
    /// Called after a failed attempt, before sleeping.
    ///
    /// # Arguments
    /// * `attempt` - Attempt that just failed (1-indexed)
    /// * `max_attempts` - Maximum number of attempts
    /// * `error` - The failure that triggered the retry
    /// * `delay` - Time until the next attempt
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &StepError, delay: Duration);
}

/// Run `operation` until it succeeds, fails with a non-retryable error,
/// runs out of attempts, or `cancel` fires between attempts.
///
/// `operation` receives the 1-indexed attempt number. The last error is
/// returned when every attempt failed.
pub fn with_retry<T, F>(
    config: &RetryConfig,
    callback: Option<&dyn RetryCallback>,
    cancel: Option<&CancelToken>,
    mut operation: F,
) -> Result<T, StepError>
where
    F: FnMut(u32) -> Result<T, StepError>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let err = match operation(attempt) {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !err.is_retryable() || attempt >= max_attempts {
            return Err(err);
        }

        let delay = config.delay_for_attempt(attempt - 1);
        if let Some(cb) = callback {
            cb.on_retry(attempt, max_attempts, &err, delay);
        }

        if !sleep_unless_cancelled(delay, cancel) {
            log::info!("Retry abandoned after attempt {attempt}: run cancelled");
            return Err(err);
        }
    }
}

/// Sleep for `delay`, waking early if cancelled. Returns false when cancelled.
fn sleep_unless_cancelled(delay: Duration, cancel: Option<&CancelToken>) -> bool {
    let Some(cancel) = cancel else {
        thread::sleep(delay);
        return true;
    };

    let deadline = Instant::now() + delay;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(Duration::from_millis(100)));
    }
}
