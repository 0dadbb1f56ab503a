//! Request orchestration: the resilience wrapper around one streaming call.
//!
//! The executor owns the order of operations for a logical request:
//!
//! ```text
//! caller
//!     │
//!     ├─> CircuitBreaker.check_state()     (a tripped breaker wins)
//!     │
//!     ├─> RateLimiter.check_state()
//!     │
//!     ├─> HTTP POST, bearer token attached
//!     │
//!     ├─> SSE decode ──> BlockAssembler ──> StreamItem channel
//!     │        ▲
//!     │        └─ inactivity watchdog around every event await
//!     │
//!     └─> on failure: classify ──> record ──> retry or surface once
//! ```
//!
//! Each call to [`RequestExecutor::execute`] spawns one driver task and
//! returns a [`RequestHandle`]: a stream of `Result<StreamItem>` plus an
//! in-flight signal that is guaranteed to drop to `false` on every exit
//! path — success, exhausted retries, terminal error, or the caller simply
//! dropping the handle. Dropping the handle detaches the consumer; the
//! driver notices on its next send (or mid-backoff) and stops promptly.
//!
//! A failed attempt that retries restarts the whole request with a reset
//! assembler. Items already delivered are not recalled; consumers built for
//! partial output tolerate a repeated prefix.

use crate::assembler::{AcceptAllValidator, BlockAssembler, ToolInputValidator, ToolRegistry};
use crate::breaker::CircuitBreaker;
use crate::error::{Error, Result};
use crate::metrics::MetricsCollector;
use crate::rate_limit::{RateLimiter, parse_retry_after};
use crate::types::{AgentOptions, ApiErrorPayload, MessagesRequest, StreamEvent, StreamItem};
use eventsource_stream::{EventStreamError, Eventsource};
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;

/// A pinned, boxed stream of assembled output items
pub type ContentStream = Pin<Box<dyn Stream<Item = Result<StreamItem>> + Send>>;

/// How many items may queue between the driver task and a slow consumer
const ITEM_CHANNEL_CAPACITY: usize = 32;

/// Handle to one in-flight logical request.
///
/// Implements [`Stream`]; poll it for text chunks and tool invocations in
/// arrival order. After exhausted retries or a terminal failure the typed
/// error arrives exactly once as the final `Err` item. Dropping the handle
/// cancels the request.
pub struct RequestHandle {
    stream: ContentStream,
    in_flight: watch::Receiver<bool>,
    request_id: String,
}

impl RequestHandle {
    /// Correlating id attached to errors and metrics for this request
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Whether the driver task is still running
    pub fn is_in_flight(&self) -> bool {
        *self.in_flight.borrow()
    }

    /// A watch receiver for the in-flight signal; observers can await
    /// `changed()` to learn when the request settles
    pub fn in_flight_signal(&self) -> watch::Receiver<bool> {
        self.in_flight.clone()
    }
}

impl Stream for RequestHandle {
    type Item = Result<StreamItem>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.stream.as_mut().poll_next(cx)
    }
}

/// Orchestrates streaming requests against one logical endpoint.
///
/// The breaker, limiter, and metrics collector are injected shared
/// references: every executor (and every concurrent request) pointed at the
/// same endpoint should share the same instances so failure isolation and
/// rate-limit state apply endpoint-wide.
pub struct RequestExecutor {
    http_client: reqwest::Client,
    options: AgentOptions,
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<RateLimiter>,
    metrics: Arc<MetricsCollector>,
    registry: Arc<ToolRegistry>,
    validator: Arc<dyn ToolInputValidator>,
    next_request_id: AtomicU64,
}

impl RequestExecutor {
    pub fn new(
        options: AgentOptions,
        breaker: Arc<CircuitBreaker>,
        limiter: Arc<RateLimiter>,
        metrics: Arc<MetricsCollector>,
        registry: Arc<ToolRegistry>,
    ) -> Result<Self> {
        // One client reused across requests for connection pooling; its
        // timeout is the umbrella for a whole request, independent of the
        // per-event inactivity watchdog.
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(options.timeout))
            .build()
            .map_err(|e| Error::validation(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            options,
            breaker,
            limiter,
            metrics,
            registry,
            validator: Arc::new(AcceptAllValidator),
            next_request_id: AtomicU64::new(0),
        })
    }

    /// Replace the tool input validator (default accepts everything)
    pub fn with_validator(mut self, validator: Arc<dyn ToolInputValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// Start one logical request and return its handle immediately.
    ///
    /// The driver task runs until the stream completes, the error budget is
    /// exhausted, or the handle is dropped.
    pub fn execute(&self, request: MessagesRequest) -> RequestHandle {
        let request_id = format!(
            "req_{}",
            self.next_request_id.fetch_add(1, Ordering::Relaxed) + 1
        );

        let (item_tx, item_rx) = mpsc::channel(ITEM_CHANNEL_CAPACITY);
        let (flight_tx, flight_rx) = watch::channel(true);

        let driver = Driver {
            http_client: self.http_client.clone(),
            options: self.options.clone(),
            breaker: self.breaker.clone(),
            limiter: self.limiter.clone(),
            metrics: self.metrics.clone(),
            registry: self.registry.clone(),
            validator: self.validator.clone(),
            request_id: request_id.clone(),
        };

        tokio::spawn(async move {
            driver.run(request, &item_tx).await;
            // Lower the flag BEFORE the item channel closes, so a consumer
            // that just saw the stream end reads in-flight == false.
            let _ = flight_tx.send(false);
            drop(item_tx);
        });

        RequestHandle {
            stream: Box::pin(ReceiverStream::new(item_rx)),
            in_flight: flight_rx,
            request_id,
        }
    }

    /// Shared metrics collector for this endpoint
    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }
}

/// How one attempt over the wire ended
enum AttemptOutcome {
    /// The stream ran to its natural end
    Completed,
    /// The consumer dropped the handle; stop without judgment
    ConsumerGone,
}

/// Per-request driver state, moved into the spawned task
struct Driver {
    http_client: reqwest::Client,
    options: AgentOptions,
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<RateLimiter>,
    metrics: Arc<MetricsCollector>,
    registry: Arc<ToolRegistry>,
    validator: Arc<dyn ToolInputValidator>,
    request_id: String,
}

impl Driver {
    async fn run(&self, request: MessagesRequest, tx: &mpsc::Sender<Result<StreamItem>>) {
        let started = Instant::now();
        self.metrics.record_request_start(&self.request_id);

        let mut assembler = BlockAssembler::new(self.registry.clone());
        let mut attempts_made: u32 = 0;

        loop {
            let gated = self.gate_then_attempt(&request, &mut assembler, tx).await;

            match gated {
                Ok(AttemptOutcome::Completed) => {
                    self.breaker.record_success().await;
                    self.metrics
                        .record_request_success(&self.request_id, started.elapsed());
                    tracing::debug!(request_id = %self.request_id, "request completed");
                    return;
                }
                Ok(AttemptOutcome::ConsumerGone) => {
                    self.metrics.record_request_detached(&self.request_id);
                    tracing::debug!(request_id = %self.request_id, "consumer detached, stopping");
                    return;
                }
                Err(err) => {
                    // Pre-call gate rejections never dialed the endpoint, so
                    // they do not count against the breaker.
                    if dialed_endpoint(&err) {
                        self.breaker.record_failure().await;
                    }

                    attempts_made += 1;
                    if self.options.retry.should_retry(&err, attempts_made) {
                        let delay = self.options.retry.delay_for(&err, attempts_made - 1);
                        self.metrics
                            .record_retry(&self.request_id, attempts_made, delay);
                        tracing::info!(
                            request_id = %self.request_id,
                            attempt = attempts_made,
                            ?delay,
                            error = %err,
                            "attempt failed, retrying"
                        );

                        assembler.reset();
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = tx.closed() => {
                                self.metrics.record_request_detached(&self.request_id);
                                tracing::debug!(
                                    request_id = %self.request_id,
                                    "consumer detached during backoff, stopping"
                                );
                                return;
                            }
                        }
                        continue;
                    }

                    self.metrics.record_request_failure(&self.request_id, &err);
                    tracing::warn!(
                        request_id = %self.request_id,
                        error = %err,
                        "request failed, surfacing to caller"
                    );
                    // The typed error is emitted exactly once, then the
                    // channel closes.
                    let _ = tx.send(Err(err)).await;
                    return;
                }
            }
        }
    }

    /// Breaker first, limiter second, then the network attempt
    async fn gate_then_attempt(
        &self,
        request: &MessagesRequest,
        assembler: &mut BlockAssembler,
        tx: &mpsc::Sender<Result<StreamItem>>,
    ) -> Result<AttemptOutcome> {
        self.breaker
            .check_state()
            .await
            .map_err(|e| e.with_request_id(&self.request_id))?;
        self.limiter
            .check_state()
            .await
            .map_err(|e| e.with_request_id(&self.request_id))?;

        self.attempt_once(request, assembler, tx).await
    }

    /// One full pass: POST, drive the SSE stream through the assembler,
    /// forward items until the stream ends or something breaks.
    async fn attempt_once(
        &self,
        request: &MessagesRequest,
        assembler: &mut BlockAssembler,
        tx: &mpsc::Sender<Result<StreamItem>>,
    ) -> Result<AttemptOutcome> {
        let url = format!("{}/messages", self.options.base_url);
        let response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.options.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| Error::from(e).with_request_id(&self.request_id))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.classify_http_error(response).await);
        }

        let mut events = Box::pin(response.bytes_stream().eventsource());
        let mut saw_first_event = false;
        let window = self.options.stream_inactivity_timeout;
        let attempt_started = Instant::now();

        loop {
            // Watchdog: every event await is bounded; the umbrella request
            // timeout lives on the HTTP client, not here.
            let next = tokio::time::timeout(window, events.next()).await;

            let sse = match next {
                Err(_elapsed) => {
                    self.metrics
                        .record_stream_inactivity(&self.request_id, window);
                    return Err(Error::timeout(format!(
                        "no stream event within {window:?}"
                    ))
                    .with_request_id(&self.request_id));
                }
                Ok(None) => return Ok(AttemptOutcome::Completed),
                Ok(Some(Err(EventStreamError::Transport(e)))) => {
                    return Err(Error::from(e).with_request_id(&self.request_id));
                }
                Ok(Some(Err(e))) => {
                    return Err(Error::stream(format!("SSE decode failed: {e}"))
                        .with_request_id(&self.request_id));
                }
                Ok(Some(Ok(sse))) => sse,
            };

            if sse.data.is_empty() {
                continue;
            }

            if !saw_first_event {
                saw_first_event = true;
                self.metrics
                    .record_latency(&self.request_id, attempt_started.elapsed());
            }

            let event: StreamEvent = serde_json::from_str(&sse.data).map_err(|e| {
                Error::stream(format!("undecodable stream event: {e}"))
                    .with_request_id(&self.request_id)
            })?;

            if let StreamEvent::Error { error } = &event {
                return Err(self.classify_api_error(error));
            }

            let finished = matches!(event, StreamEvent::MessageStop);

            for item in assembler.process_event(event) {
                let item = match item {
                    StreamItem::ToolUse(invocation) => {
                        if let Err(err) = self
                            .validator
                            .validate(&invocation.name, &invocation.input)
                            .await
                        {
                            tracing::warn!(
                                request_id = %self.request_id,
                                tool = %invocation.name,
                                error = %err,
                                "tool input rejected by validator, dropping"
                            );
                            continue;
                        }
                        StreamItem::ToolUse(invocation)
                    }
                    text => text,
                };

                if tx.send(Ok(item)).await.is_err() {
                    return Ok(AttemptOutcome::ConsumerGone);
                }
            }

            if finished {
                return Ok(AttemptOutcome::Completed);
            }
        }
    }

    /// Turn a non-2xx response into the typed taxonomy; 429s also feed the
    /// rate limiter.
    async fn classify_http_error(&self, response: reqwest::Response) -> Error {
        let status = response.status().as_u16();
        let retry_after_header = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let retry_after = retry_after_header.as_deref().and_then(parse_retry_after);

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unable to read error response body".to_string());

        if status == 429 {
            self.limiter
                .record_rate_limit(status, retry_after_header.as_deref())
                .await;
            self.metrics.record_rate_limit(&self.request_id, retry_after);
        }

        Error::from_http_status(status, body, Some(self.request_id.clone()), retry_after)
    }

    /// Map a server-reported in-stream error event onto the taxonomy
    fn classify_api_error(&self, payload: &ApiErrorPayload) -> Error {
        let err = match payload.error_type.as_str() {
            "rate_limit_error" => Error::rate_limited(payload.message.clone(), None),
            "overloaded_error" | "api_error" => Error::Server {
                message: payload.message.clone(),
                request_id: None,
                status_code: None,
            },
            _ => Error::stream(format!(
                "{}: {}",
                payload.error_type, payload.message
            )),
        };
        err.with_request_id(&self.request_id)
    }
}

/// Whether this error came back from the endpoint itself (as opposed to a
/// local gate rejecting the call before it was made)
fn dialed_endpoint(err: &Error) -> bool {
    match err {
        Error::CircuitOpen { .. } => false,
        // A RateLimit without an HTTP status is the local limiter's
        // fail-fast; one with a status is a real 429 from the server.
        Error::RateLimit { status_code, .. } => status_code.is_some(),
        _ => true,
    }
}
