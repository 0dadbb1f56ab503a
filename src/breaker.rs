//! Circuit breaker shared by every request against one logical endpoint.
//!
//! State machine:
//!
//! ```text
//! Closed --failure_threshold consecutive failures--> Open
//! Open   --recovery_timeout elapsed-->               HalfOpen
//! HalfOpen --half_open_success_threshold successes-> Closed
//! HalfOpen --any failure-->                          Open
//! ```
//!
//! There is no terminal state; the breaker cycles indefinitely. Every
//! transition is reported to the attached metrics sink and logged.

use crate::error::{Error, Result};
use crate::metrics::MetricsCollector;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Breaker position
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Thresholds governing the breaker's transitions
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in `Closed` before tripping to `Open`
    pub failure_threshold: u32,
    /// How long `Open` rejects calls before probing via `HalfOpen`
    pub recovery_timeout: Duration,
    /// Consecutive successes in `HalfOpen` before returning to `Closed`
    pub half_open_success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_success_threshold: 2,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    half_open_successes: u32,
    last_failure_time: Option<Instant>,
}

/// Failure-isolation guard for one logical endpoint.
///
/// Created once and shared (`Arc`) across all concurrent requests to that
/// endpoint; all methods take `&self` and tolerate concurrent callers.
/// Reset only by an explicit [`CircuitBreaker::reset`].
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                half_open_successes: 0,
                last_failure_time: None,
            }),
            metrics: None,
        }
    }

    /// Attach a metrics sink; every subsequent transition is reported to it
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Gate a call.
    ///
    /// Fails with [`Error::CircuitOpen`] while `Open` and inside the
    /// recovery window. Once the window has elapsed the breaker moves to
    /// `HalfOpen` and the call is allowed through as a probe.
    pub async fn check_state(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure_time
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.config.recovery_timeout {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.half_open_successes = 0;
                    Ok(())
                } else {
                    Err(Error::circuit_open(self.config.recovery_timeout - elapsed))
                }
            }
        }
    }

    /// Record a successful call
    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            // Successes while Closed are the normal case; nothing to track.
            CircuitState::Closed => {}
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.half_open_success_threshold {
                    self.transition(&mut inner, CircuitState::Closed);
                    inner.failure_count = 0;
                    inner.half_open_successes = 0;
                    tracing::info!("circuit breaker closed after successful half-open probes");
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed call
    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open);
                    inner.last_failure_time = Some(Instant::now());
                    tracing::error!(
                        failures = inner.failure_count,
                        "circuit breaker opened, failure threshold reached"
                    );
                }
            }
            CircuitState::HalfOpen => {
                self.transition(&mut inner, CircuitState::Open);
                inner.half_open_successes = 0;
                inner.last_failure_time = Some(Instant::now());
                tracing::error!("circuit breaker re-opened after half-open failure");
            }
            CircuitState::Open => {}
        }
    }

    /// Unconditionally force `Closed` with zero counters. Operator escape
    /// hatch, valid in any state.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state != CircuitState::Closed {
            self.transition(&mut inner, CircuitState::Closed);
        }
        inner.failure_count = 0;
        inner.half_open_successes = 0;
        inner.last_failure_time = None;
    }

    /// Current state (diagnostics; may be stale by the time it is read)
    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    /// Consecutive failure count while `Closed` (diagnostics)
    pub async fn failure_count(&self) -> u32 {
        self.inner.lock().await.failure_count
    }

    fn transition(&self, inner: &mut BreakerInner, next: CircuitState) {
        let previous = inner.state;
        inner.state = next;
        tracing::debug!(?previous, ?next, "circuit breaker transition");
        if let Some(metrics) = &self.metrics {
            metrics.record_state_change(previous, next);
        }
    }
}
