//! # Resilient Agent SDK
//!
//! A streaming-first Rust client for LLM Messages APIs with a built-in
//! resilience layer.
//!
//! ## Overview
//!
//! The SDK consumes the incremental event stream of a Messages API response
//! and turns it into two observable outputs:
//!
//! - **Text chunks**, forwarded the moment each delta arrives
//! - **Tool invocations**, assembled from fragmented partial-JSON deltas and
//!   dispatched through a caller-supplied parser registry
//!
//! Every network attempt is wrapped in the same resilience pipeline:
//!
//! - **Bounded retry** with exponential backoff and jitter, honoring
//!   server-suggested `Retry-After` values
//! - **Circuit breaking** with Closed/Open/Half-Open states shared across
//!   all requests to one endpoint
//! - **Rate-limit tracking** from HTTP 429 responses
//! - **Metrics**: typed events on a broadcast channel plus aggregated
//!   counters and latency percentiles
//!
//! ## Two Interaction Modes
//!
//! ### 1. Simple Query Function (`query()`)
//! For single-shot requests without shared endpoint state:
//!
//! ```rust,no_run
//! use resilient_agent::{query, AgentOptions, StreamItem};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = AgentOptions::builder()
//!         .system_prompt("You are a helpful assistant")
//!         .model("claude-sonnet-4-5")
//!         .base_url("https://api.anthropic.com/v1")
//!         .api_key("sk-ant-...")
//!         .build()?;
//!
//!     let mut stream = query("What's the capital of France?", &options).await?;
//!
//!     while let Some(item) = stream.next().await {
//!         if let StreamItem::Text(chunk) = item? {
//!             print!("{chunk}");
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ### 2. Client Object (`Client`)
//! For an endpoint whose breaker, rate-limit, and metrics state should
//! persist across requests:
//!
//! ```rust,no_run
//! use resilient_agent::{AgentOptions, Client, StreamItem, ToolRegistry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut registry = ToolRegistry::new();
//!     registry.register_passthrough("render_surface");
//!
//!     let options = AgentOptions::builder()
//!         .model("claude-sonnet-4-5")
//!         .base_url("https://api.anthropic.com/v1")
//!         .api_key("sk-ant-...")
//!         .build()?;
//!
//!     let mut client = Client::with_registry(options, registry)?;
//!
//!     client.send("Show me surface s1").await?;
//!     while let Some(item) = client.receive().await? {
//!         match item {
//!             StreamItem::Text(chunk) => print!("{chunk}"),
//!             StreamItem::ToolUse(invocation) => {
//!                 println!("tool: {} {}", invocation.name, invocation.input);
//!             }
//!         }
//!     }
//!
//!     println!("stats: {:?}", client.metrics().stats());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **client**: stateful `Client` and the single-shot `query()` function
//! - **executor**: per-request orchestration — gating, SSE driving,
//!   watchdog, retry loop, in-flight signal
//! - **assembler**: the content-block state machine and tool parser registry
//! - **breaker**: three-state circuit breaker shared per endpoint
//! - **retry**: backoff policy with jitter and Retry-After override
//! - **rate_limit**: 429 deadline tracking
//! - **metrics**: typed event broadcast and aggregated stats
//! - **types**: configuration, wire events, and output items
//! - **error**: the typed, exhaustively-matchable error taxonomy
//! - **config**: environment-variable helpers

/// Content-block assembly: the per-index accumulator state machine and the
/// tool-name-keyed parser registry.
mod assembler;

/// Circuit breaker shared by every request against one logical endpoint.
mod breaker;

/// Stateful client and the single-shot `query()` entry point.
mod client;

/// Environment-variable configuration helpers.
mod config;

/// Error types and HTTP status classification for the whole SDK.
mod error;

/// Request orchestration: gating, streaming, watchdog, retries.
mod executor;

/// Metrics collection: typed events, broadcast fan-out, rolling stats.
mod metrics;

/// Rate-limit deadline tracking from 429 responses.
mod rate_limit;

/// Core type definitions: options, wire events, output items.
mod types;

/// Retry policy with exponential backoff and jitter.
/// Public as a module so callers can reuse the policy for their own
/// operations.
pub mod retry;

// --- Core Client API ---

pub use client::{Client, query};

pub use executor::{ContentStream, RequestExecutor, RequestHandle};

// --- Assembly ---

pub use assembler::{
    AcceptAllValidator, BlockAssembler, ToolInputValidator, ToolParser, ToolRegistry,
};

// --- Resilience ---

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

pub use rate_limit::{RateLimiter, parse_retry_after};

pub use retry::RetryConfig;

// --- Observability ---

pub use metrics::{MetricsCollector, MetricsEvent, MetricsEventKind, MetricsStats};

// --- Configuration ---

pub use config::{DEFAULT_BASE_URL, get_api_key, get_base_url, get_model};

// --- Error Handling ---

pub use error::{Error, Result};

// --- Core Types ---

pub use types::{
    AgentOptions, AgentOptionsBuilder, ApiErrorPayload, ContentDelta, InputMessage,
    MessageDeltaPayload, MessagesRequest, Role, StartedBlock, StreamEvent, StreamItem,
    ToolInvocation, Usage,
};

/// Convenience module containing the most commonly used types and functions.
/// Import with `use resilient_agent::prelude::*;` for typical usage.
pub mod prelude {
    pub use crate::{
        AgentOptions, AgentOptionsBuilder, CircuitBreakerConfig, CircuitState, Client, Error,
        MetricsStats, RequestHandle, Result, RetryConfig, StreamItem, ToolInvocation,
        ToolRegistry, query,
    };
}
