//! Client for streaming queries against a Messages API endpoint.
//!
//! Two interaction modes, mirroring the layered design underneath:
//!
//! - [`query`] — stateless single-shot: build a request from options plus a
//!   prompt, return the item stream directly.
//! - [`Client`] — stateful: owns the shared resilience pieces (circuit
//!   breaker, rate limiter, metrics collector) for one logical endpoint and
//!   drives one request at a time through `send()`/`receive()`.
//!
//! The client hands its consumers exactly three observable things: a stream
//! of [`StreamItem`]s (text chunks and assembled tool invocations, in
//! arrival order), a typed [`crate::Error`] delivered at most once per
//! request, and an in-flight flag that is `true` from `send()` until the
//! request settles by any path.
//!
//! # Examples
//!
//! ```rust,no_run
//! use resilient_agent::{AgentOptions, Client, StreamItem, ToolRegistry};
//!
//! # async fn example() -> resilient_agent::Result<()> {
//! let mut registry = ToolRegistry::new();
//! registry.register_passthrough("render_surface");
//!
//! let options = AgentOptions::builder()
//!     .model("claude-sonnet-4-5")
//!     .base_url("https://api.anthropic.com/v1")
//!     .api_key("sk-ant-...")
//!     .build()?;
//!
//! let mut client = Client::with_registry(options, registry)?;
//! client.send("Show me surface s1").await?;
//!
//! while let Some(item) = client.receive().await? {
//!     match item {
//!         StreamItem::Text(chunk) => print!("{chunk}"),
//!         StreamItem::ToolUse(invocation) => {
//!             println!("tool requested: {}", invocation.name);
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Cancellation
//!
//! The interrupt flag is an `Arc<AtomicBool>` that can be cloned into other
//! tasks; setting it makes the next `receive()` drop the in-flight request.
//! The driver task notices the detached consumer and stops promptly,
//! including a pending retry backoff.

use crate::assembler::{ToolInputValidator, ToolRegistry};
use crate::breaker::CircuitBreaker;
use crate::error::Result;
use crate::executor::{RequestExecutor, RequestHandle};
use crate::metrics::MetricsCollector;
use crate::rate_limit::RateLimiter;
use crate::types::{AgentOptions, MessagesRequest, StreamItem};
use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Single-shot query: build a request from `options` and `prompt`, start it,
/// and return the handle to poll.
///
/// Uses an empty tool registry, so only text chunks are produced; for tool
/// invocations construct a [`Client`] with a populated [`ToolRegistry`].
pub async fn query(prompt: &str, options: &AgentOptions) -> Result<RequestHandle> {
    let client = Client::new(options.clone())?;
    let request = MessagesRequest::from_prompt(options, prompt);
    Ok(client.executor.execute(request))
}

/// Stateful client for one logical endpoint.
///
/// All resilience state — breaker position, rate-limit deadline, metrics —
/// is owned here and shared by reference with every request the client
/// starts, so consecutive (or concurrent, via [`Client::executor`]) calls
/// see one coherent failure-isolation picture.
pub struct Client {
    options: AgentOptions,
    executor: Arc<RequestExecutor>,
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<RateLimiter>,
    metrics: Arc<MetricsCollector>,
    current: Option<RequestHandle>,
    interrupted: Arc<AtomicBool>,
}

impl Client {
    /// Create a client with an empty tool registry (text-only output)
    pub fn new(options: AgentOptions) -> Result<Self> {
        Self::with_registry(options, ToolRegistry::new())
    }

    /// Create a client with the given tool parser registry
    pub fn with_registry(options: AgentOptions, registry: ToolRegistry) -> Result<Self> {
        let metrics = Arc::new(MetricsCollector::new(options.metrics_enabled));
        let breaker = Arc::new(
            CircuitBreaker::new(options.breaker.clone()).with_metrics(metrics.clone()),
        );
        let limiter = Arc::new(RateLimiter::new());

        let executor = Arc::new(RequestExecutor::new(
            options.clone(),
            breaker.clone(),
            limiter.clone(),
            metrics.clone(),
            Arc::new(registry),
        )?);

        Ok(Self {
            options,
            executor,
            breaker,
            limiter,
            metrics,
            current: None,
            interrupted: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Install a tool input validator on the executor.
    ///
    /// Must be called before the first `send()`; requests already started
    /// keep the validator they were created with.
    pub fn with_validator(mut self, validator: Arc<dyn ToolInputValidator>) -> Result<Self> {
        let executor = Arc::try_unwrap(self.executor)
            .map_err(|_| crate::Error::validation("validator must be set before use"))?
            .with_validator(validator);
        self.executor = Arc::new(executor);
        Ok(self)
    }

    /// Start a new request for `prompt`.
    ///
    /// Any previous in-flight request is dropped (its driver task stops on
    /// its own once it notices). The interrupt flag is cleared so the
    /// client is reusable after a prior interruption.
    pub async fn send(&mut self, prompt: &str) -> Result<()> {
        self.interrupted.store(false, Ordering::SeqCst);

        let request = MessagesRequest::from_prompt(&self.options, prompt);
        self.current = Some(self.executor.execute(request));
        Ok(())
    }

    /// Receive the next item from the in-flight request.
    ///
    /// - `Ok(Some(item))` — a text chunk or tool invocation
    /// - `Ok(None)` — the stream ended, or there is no request in flight,
    ///   or the interrupt flag was set
    /// - `Err(e)` — the request failed; the error is delivered once and the
    ///   stream is closed
    pub async fn receive(&mut self) -> Result<Option<StreamItem>> {
        if self.interrupted.load(Ordering::SeqCst) {
            self.current = None;
            return Ok(None);
        }

        let Some(handle) = &mut self.current else {
            return Ok(None);
        };

        match handle.next().await {
            Some(Ok(item)) => Ok(Some(item)),
            Some(Err(err)) => {
                self.current = None;
                Err(err)
            }
            None => {
                self.current = None;
                Ok(None)
            }
        }
    }

    /// Clone of the interrupt flag for use from other tasks
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        self.interrupted.clone()
    }

    /// Whether a request is currently in flight
    pub fn is_in_flight(&self) -> bool {
        self.current
            .as_ref()
            .map(RequestHandle::is_in_flight)
            .unwrap_or(false)
    }

    /// The executor, for callers running multiple concurrent requests
    /// against this endpoint's shared resilience state
    pub fn executor(&self) -> Arc<RequestExecutor> {
        self.executor.clone()
    }

    /// Shared metrics collector
    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    /// Shared circuit breaker (e.g. for an operator `reset()`)
    pub fn breaker(&self) -> Arc<CircuitBreaker> {
        self.breaker.clone()
    }

    /// Shared rate limiter
    pub fn rate_limiter(&self) -> Arc<RateLimiter> {
        self.limiter.clone()
    }

    /// The configuration this client was built with
    pub fn options(&self) -> &AgentOptions {
        &self.options
    }
}
