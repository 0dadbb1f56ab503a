//! Metrics collection for the request pipeline.
//!
//! The collector does two things with every recorded event: it appends the
//! event to a bounded internal buffer (from which [`MetricsStats`] is
//! derived on demand) and publishes it on a broadcast channel so external
//! sinks can follow along live. Each subscriber gets its own cursor; a
//! subscriber that joins late sees only events recorded after it
//! subscribed, never a replay.
//!
//! Counters are simple tallies. Latency percentiles are computed by
//! nearest-rank over a bounded rolling sample window, so the collector's
//! memory use is flat no matter how long the process runs.
//!
//! Disabling the collector (`enabled = false`) turns every record call
//! into an early return; the cost is one branch.

use crate::breaker::CircuitState;
use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;

/// Capacity of the broadcast channel; slow subscribers lag, never block
const BROADCAST_CAPACITY: usize = 256;

/// Rolling window sizes for the internal buffers
const MAX_EVENT_BUFFER: usize = 1024;
const MAX_LATENCY_SAMPLES: usize = 1000;

/// One recorded observation, timestamped and optionally correlated to a
/// request
#[derive(Debug, Clone, Serialize)]
pub struct MetricsEvent {
    pub timestamp: DateTime<Utc>,
    pub request_id: Option<String>,
    pub kind: MetricsEventKind,
}

/// The eight observable event kinds
#[derive(Debug, Clone, Serialize)]
pub enum MetricsEventKind {
    CircuitBreakerStateChange {
        previous: CircuitState,
        new: CircuitState,
    },
    RetryAttempt {
        attempt: u32,
        delay: Duration,
    },
    RequestStart,
    RequestSuccess {
        latency: Duration,
    },
    RequestFailure {
        error: String,
    },
    RateLimit {
        retry_after: Option<Duration>,
    },
    Latency {
        latency: Duration,
    },
    StreamInactivity {
        window: Duration,
    },
}

/// Aggregated view derived from the rolling buffers
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsStats {
    pub total_requests: u64,
    pub active_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub retry_attempts: u64,
    pub rate_limit_hits: u64,
    pub circuit_breaker_opens: u64,
    pub stream_inactivity_timeouts: u64,
    pub latency_p50: Duration,
    pub latency_p95: Duration,
    pub latency_p99: Duration,
    pub latency_mean: Duration,
    pub latency_samples: usize,
}

#[derive(Debug, Default)]
struct MetricsInner {
    total_requests: u64,
    active_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    retry_attempts: u64,
    rate_limit_hits: u64,
    circuit_breaker_opens: u64,
    stream_inactivity_timeouts: u64,
    events: VecDeque<MetricsEvent>,
    latencies: VecDeque<Duration>,
}

/// Collects typed events from every pipeline component.
///
/// One collector is shared (`Arc`) per logical endpoint; all methods take
/// `&self` and tolerate concurrent recording from multiple request tasks.
pub struct MetricsCollector {
    enabled: bool,
    sender: broadcast::Sender<MetricsEvent>,
    inner: Mutex<MetricsInner>,
}

impl MetricsCollector {
    pub fn new(enabled: bool) -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            enabled,
            sender,
            inner: Mutex::new(MetricsInner::default()),
        }
    }

    /// Whether record calls do anything
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Subscribe to the live event feed from this point onward
    pub fn subscribe(&self) -> broadcast::Receiver<MetricsEvent> {
        self.sender.subscribe()
    }

    /// A request entered the pipeline
    pub fn record_request_start(&self, request_id: &str) {
        if !self.enabled {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.total_requests += 1;
        inner.active_requests += 1;
        self.publish(&mut inner, Some(request_id), MetricsEventKind::RequestStart);
    }

    /// A request completed its stream to the natural end
    pub fn record_request_success(&self, request_id: &str, latency: Duration) {
        if !self.enabled {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.successful_requests += 1;
        inner.active_requests = inner.active_requests.saturating_sub(1);
        push_bounded(&mut inner.latencies, latency, MAX_LATENCY_SAMPLES);
        self.publish(
            &mut inner,
            Some(request_id),
            MetricsEventKind::RequestSuccess { latency },
        );
    }

    /// A request surfaced a terminal error
    pub fn record_request_failure(&self, request_id: &str, error: &Error) {
        if !self.enabled {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.failed_requests += 1;
        inner.active_requests = inner.active_requests.saturating_sub(1);
        self.publish(
            &mut inner,
            Some(request_id),
            MetricsEventKind::RequestFailure {
                error: error.to_string(),
            },
        );
    }

    /// An attempt failed and the pipeline is about to wait and go again
    pub fn record_retry(&self, request_id: &str, attempt: u32, delay: Duration) {
        if !self.enabled {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.retry_attempts += 1;
        self.publish(
            &mut inner,
            Some(request_id),
            MetricsEventKind::RetryAttempt { attempt, delay },
        );
    }

    /// The server answered 429
    pub fn record_rate_limit(&self, request_id: &str, retry_after: Option<Duration>) {
        if !self.enabled {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.rate_limit_hits += 1;
        self.publish(
            &mut inner,
            Some(request_id),
            MetricsEventKind::RateLimit { retry_after },
        );
    }

    /// The circuit breaker moved between states
    pub fn record_state_change(&self, previous: CircuitState, new: CircuitState) {
        if !self.enabled {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        if new == CircuitState::Open {
            inner.circuit_breaker_opens += 1;
        }
        self.publish(
            &mut inner,
            None,
            MetricsEventKind::CircuitBreakerStateChange { previous, new },
        );
    }

    /// A sub-operation latency observation (e.g. time to first event)
    pub fn record_latency(&self, request_id: &str, latency: Duration) {
        if !self.enabled {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        push_bounded(&mut inner.latencies, latency, MAX_LATENCY_SAMPLES);
        self.publish(
            &mut inner,
            Some(request_id),
            MetricsEventKind::Latency { latency },
        );
    }

    /// The consumer walked away before the request settled.
    ///
    /// Bookkeeping only: the active gauge is corrected but no event is
    /// published — cancellation is not one of the observable outcomes.
    pub fn record_request_detached(&self, request_id: &str) {
        if !self.enabled {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.active_requests = inner.active_requests.saturating_sub(1);
        tracing::debug!(request_id, "request detached before completion");
    }

    /// The stream-inactivity watchdog fired
    pub fn record_stream_inactivity(&self, request_id: &str, window: Duration) {
        if !self.enabled {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.stream_inactivity_timeouts += 1;
        self.publish(
            &mut inner,
            Some(request_id),
            MetricsEventKind::StreamInactivity { window },
        );
    }

    /// Compute the aggregated view from the rolling buffers
    pub fn stats(&self) -> MetricsStats {
        let inner = self.inner.lock().unwrap();

        let mut sorted: Vec<Duration> = inner.latencies.iter().copied().collect();
        sorted.sort_unstable();

        let mean = if sorted.is_empty() {
            Duration::ZERO
        } else {
            sorted.iter().sum::<Duration>() / sorted.len() as u32
        };

        MetricsStats {
            total_requests: inner.total_requests,
            active_requests: inner.active_requests,
            successful_requests: inner.successful_requests,
            failed_requests: inner.failed_requests,
            retry_attempts: inner.retry_attempts,
            rate_limit_hits: inner.rate_limit_hits,
            circuit_breaker_opens: inner.circuit_breaker_opens,
            stream_inactivity_timeouts: inner.stream_inactivity_timeouts,
            latency_p50: percentile(&sorted, 50),
            latency_p95: percentile(&sorted, 95),
            latency_p99: percentile(&sorted, 99),
            latency_mean: mean,
            latency_samples: sorted.len(),
        }
    }

    /// Recently recorded events, oldest first (bounded window)
    pub fn recent_events(&self) -> Vec<MetricsEvent> {
        let inner = self.inner.lock().unwrap();
        inner.events.iter().cloned().collect()
    }

    /// Clear all counters and samples.
    ///
    /// Active broadcast subscriptions are untouched; subscribers keep
    /// receiving events recorded after the reset.
    pub fn reset_stats(&self) {
        let mut inner = self.inner.lock().unwrap();
        *inner = MetricsInner::default();
    }

    fn publish(&self, inner: &mut MetricsInner, request_id: Option<&str>, kind: MetricsEventKind) {
        let event = MetricsEvent {
            timestamp: Utc::now(),
            request_id: request_id.map(str::to_string),
            kind,
        };
        push_bounded(&mut inner.events, event.clone(), MAX_EVENT_BUFFER);
        // A send only fails when there are no subscribers; that is fine.
        let _ = self.sender.send(event);
    }
}

fn push_bounded<T>(buffer: &mut VecDeque<T>, value: T, cap: usize) {
    if buffer.len() == cap {
        buffer.pop_front();
    }
    buffer.push_back(value);
}

/// Nearest-rank percentile over an already-sorted slice
fn percentile(sorted: &[Duration], pct: u32) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let rank = ((pct as f64 / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
