//! Retry policy with exponential backoff and jitter.
//!
//! Decides, given a typed error and how many attempts have already run,
//! whether to try again and how long to wait first. Delays grow
//! multiplicatively with the attempt count, are capped at `max_delay`, and
//! are randomized to avoid synchronized retry storms. When the server sent
//! an explicit `Retry-After`, that wins over the computed backoff.
//!
//! # Examples
//!
//! ```rust
//! use resilient_agent::retry::RetryConfig;
//! use std::time::Duration;
//!
//! let config = RetryConfig::default()
//!     .with_max_attempts(5)
//!     .with_initial_delay(Duration::from_millis(500));
//!
//! let first = config.delay_for_attempt(0);
//! let second = config.delay_for_attempt(1);
//! assert!(second >= first);
//! ```

use crate::error::Error;
use std::collections::HashSet;
use std::time::Duration;

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (first try included)
    pub max_attempts: u32,

    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Ceiling for any computed delay
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (2.0 doubles the delay each time)
    pub backoff_multiplier: f64,

    /// Random jitter amplitude as a fraction of the base delay (0.0 to 1.0)
    pub jitter_factor: f64,

    /// HTTP status codes eligible for retry
    pub retryable_status_codes: HashSet<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            retryable_status_codes: [429, 500, 502, 503, 504].into_iter().collect(),
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum number of attempts
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set initial delay
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set jitter factor (clamped to 0.0..=1.0)
    pub fn with_jitter_factor(mut self, jitter: f64) -> Self {
        self.jitter_factor = jitter.clamp(0.0, 1.0);
        self
    }

    /// Replace the retryable status code set
    pub fn with_retryable_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_status_codes = codes.into_iter().collect();
        self
    }

    /// Whether a response status is eligible for retry under this policy
    pub fn is_status_retryable(&self, status: u16) -> bool {
        self.retryable_status_codes.contains(&status)
    }

    /// Decide whether to retry after a failure.
    ///
    /// `attempt` is the number of attempts already made. Non-retryable
    /// error variants are never retried; errors carrying an HTTP status are
    /// additionally gated by [`RetryConfig::retryable_status_codes`].
    pub fn should_retry(&self, error: &Error, attempt: u32) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        if !error.is_retryable() {
            return false;
        }
        match error.status_code() {
            Some(status) => self.is_status_retryable(status),
            None => true,
        }
    }

    /// Delay before retrying after the given 0-based failed attempt.
    ///
    /// ```text
    /// base   = min(initial_delay * backoff_multiplier^attempt, max_delay)
    /// jitter = base * jitter_factor * uniform(-1, 1)
    /// delay  = max(0, base + jitter)
    /// ```
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay_ms = self.initial_delay.as_millis() as f64;
        let exponential_delay = base_delay_ms * self.backoff_multiplier.powi(attempt as i32);

        // Cap at max delay
        let capped_delay = exponential_delay.min(self.max_delay.as_millis() as f64);

        // Add jitter
        let jitter = capped_delay * self.jitter_factor * (rand::random::<f64>() * 2.0 - 1.0);
        let final_delay = capped_delay + jitter;

        Duration::from_millis(final_delay.max(0.0) as u64)
    }

    /// Delay before retrying `error`, honoring a server-suggested
    /// `Retry-After` when one was carried by a rate-limit error.
    pub fn delay_for(&self, error: &Error, attempt: u32) -> Duration {
        if let Error::RateLimit {
            retry_after: Some(suggested),
            ..
        } = error
        {
            return *suggested;
        }
        self.delay_for_attempt(attempt)
    }
}
