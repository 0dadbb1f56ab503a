//! Rate-limit tracking from HTTP 429 responses.
//!
//! The limiter holds a single "limited until" deadline. Recording a 429
//! with a `Retry-After` value pushes the deadline out; execution is gated
//! by a plain wall-clock comparison, so no background timer is needed and
//! the state decays on its own.
//!
//! `Retry-After` arrives in one of two formats (RFC 7231): a bare integer
//! number of seconds, or an HTTP-date. Anything else leaves the limiter
//! untouched.

use crate::error::{Error, Result};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Gates requests while the server has asked us to back off.
///
/// Shared (`Arc`) across every request to one logical endpoint; reads are
/// frequent, writes happen only when a 429 arrives.
pub struct RateLimiter {
    limited_until: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            limited_until: Mutex::new(None),
        }
    }

    /// Whether the deadline is still in the future
    pub async fn is_rate_limited(&self) -> bool {
        let limited_until = self.limited_until.lock().await;
        matches!(*limited_until, Some(deadline) if Instant::now() < deadline)
    }

    /// Fail fast with [`Error::RateLimit`] while limited.
    ///
    /// The error carries the remaining wait as its `retry_after` so retry
    /// scheduling can honor it. No HTTP status is attached; this rejection
    /// is local, the server was never dialed.
    pub async fn check_state(&self) -> Result<()> {
        let limited_until = self.limited_until.lock().await;
        if let Some(deadline) = *limited_until {
            let now = Instant::now();
            if now < deadline {
                return Err(Error::RateLimit {
                    message: "rate limited by server, deadline not reached".to_string(),
                    request_id: None,
                    status_code: None,
                    retry_after: Some(deadline - now),
                });
            }
        }
        Ok(())
    }

    /// Run `operation` only if the limiter allows it; never invokes the
    /// operation while limited.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.check_state().await?;
        operation().await
    }

    /// Record a rate-limit response.
    ///
    /// An unparsable or absent `Retry-After` is a defensive no-op; the
    /// limiter never guesses a deadline the server did not state.
    pub async fn record_rate_limit(&self, status_code: u16, retry_after: Option<&str>) {
        let Some(value) = retry_after else {
            tracing::debug!(status_code, "rate limit response without Retry-After");
            return;
        };
        let Some(delay) = parse_retry_after(value) else {
            tracing::debug!(status_code, retry_after = value, "unparsable Retry-After");
            return;
        };

        let deadline = Instant::now() + delay;
        let mut limited_until = self.limited_until.lock().await;
        *limited_until = Some(deadline);
        tracing::warn!(status_code, ?delay, "rate limited, pausing requests");
    }

    /// Clear any deadline, returning to the not-limited state
    pub async fn reset(&self) {
        let mut limited_until = self.limited_until.lock().await;
        *limited_until = None;
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a `Retry-After` header value: bare seconds or an HTTP-date.
///
/// A date in the past yields `Duration::ZERO`. Returns `None` for anything
/// that is neither format.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    // HTTP-dates (IMF-fixdate) share their shape with RFC 2822.
    if let Ok(date) = chrono::DateTime::parse_from_rfc2822(value) {
        let delta = date.signed_duration_since(chrono::Utc::now());
        return Some(delta.to_std().unwrap_or(Duration::ZERO));
    }

    None
}
