//! Core types for the Resilient Agent SDK
//!
//! Three groups live here: agent configuration ([`AgentOptions`] and its
//! builder), the wire-level Messages API payloads (request body and the
//! tagged [`StreamEvent`] union), and the assembled outputs the pipeline
//! hands to consumers ([`StreamItem`], [`ToolInvocation`]).

use crate::breaker::CircuitBreakerConfig;
use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Options for configuring the streaming client
#[derive(Clone)]
pub struct AgentOptions {
    /// System prompt to set the model's behavior
    pub system_prompt: String,

    /// Model name (e.g., "claude-sonnet-4-5")
    pub model: String,

    /// Messages API endpoint base URL
    pub base_url: String,

    /// Bearer token attached to every request
    pub api_key: String,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Sampling temperature (0.0 to 1.0)
    pub temperature: Option<f32>,

    /// Umbrella timeout for one whole request, in seconds
    pub timeout: u64,

    /// Watchdog window: fail the attempt if no stream event arrives in time
    pub stream_inactivity_timeout: Duration,

    /// Retry behavior for transient failures
    pub retry: RetryConfig,

    /// Circuit breaker thresholds for the endpoint
    pub breaker: CircuitBreakerConfig,

    /// Record metrics events (set false to make every record call a no-op)
    pub metrics_enabled: bool,
}

impl std::fmt::Debug for AgentOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentOptions")
            .field("system_prompt", &self.system_prompt)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &"***")
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("timeout", &self.timeout)
            .field("stream_inactivity_timeout", &self.stream_inactivity_timeout)
            .field("retry", &self.retry)
            .field("breaker", &self.breaker)
            .field("metrics_enabled", &self.metrics_enabled)
            .finish()
    }
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            model: String::new(),
            base_url: String::new(),
            api_key: String::new(),
            max_tokens: 4096,
            temperature: None,
            timeout: 120,
            stream_inactivity_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            breaker: CircuitBreakerConfig::default(),
            metrics_enabled: true,
        }
    }
}

impl AgentOptions {
    /// Create a new builder for AgentOptions
    pub fn builder() -> AgentOptionsBuilder {
        AgentOptionsBuilder::default()
    }
}

/// Builder for AgentOptions
#[derive(Default)]
pub struct AgentOptionsBuilder {
    system_prompt: Option<String>,
    model: Option<String>,
    base_url: Option<String>,
    api_key: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    timeout: Option<u64>,
    stream_inactivity_timeout: Option<Duration>,
    retry: Option<RetryConfig>,
    breaker: Option<CircuitBreakerConfig>,
    metrics_enabled: Option<bool>,
}

impl AgentOptionsBuilder {
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    pub fn temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn timeout(mut self, timeout: u64) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn stream_inactivity_timeout(mut self, window: Duration) -> Self {
        self.stream_inactivity_timeout = Some(window);
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn metrics_enabled(mut self, enabled: bool) -> Self {
        self.metrics_enabled = Some(enabled);
        self
    }

    pub fn build(self) -> crate::Result<AgentOptions> {
        let model = self
            .model
            .ok_or_else(|| crate::Error::validation("model is required"))?;

        let base_url = self
            .base_url
            .ok_or_else(|| crate::Error::validation("base_url is required"))?;

        Ok(AgentOptions {
            system_prompt: self.system_prompt.unwrap_or_default(),
            model,
            base_url,
            api_key: self.api_key.unwrap_or_default(),
            max_tokens: self.max_tokens.unwrap_or(4096),
            temperature: self.temperature,
            timeout: self.timeout.unwrap_or(120),
            stream_inactivity_timeout: self
                .stream_inactivity_timeout
                .unwrap_or(Duration::from_secs(30)),
            retry: self.retry.unwrap_or_default(),
            breaker: self.breaker.unwrap_or_default(),
            metrics_enabled: self.metrics_enabled.unwrap_or(true),
        })
    }
}

/// Role of an input message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of input sent to the Messages API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputMessage {
    pub role: Role,
    pub content: String,
}

impl InputMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
        }
    }
}

/// Request body for a streaming Messages API call
#[derive(Debug, Clone, Serialize)]
pub struct MessagesRequest {
    pub model: String,
    pub max_tokens: u32,
    pub messages: Vec<InputMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<serde_json::Value>>,
}

impl MessagesRequest {
    /// Build a single-turn streaming request from options plus a user prompt
    pub fn from_prompt(options: &AgentOptions, prompt: impl Into<String>) -> Self {
        Self {
            model: options.model.clone(),
            max_tokens: options.max_tokens,
            messages: vec![InputMessage::user(prompt)],
            stream: true,
            system: if options.system_prompt.is_empty() {
                None
            } else {
                Some(options.system_prompt.clone())
            },
            temperature: options.temperature,
            tools: None,
        }
    }
}

/// A streaming event from the Messages API.
///
/// Field names are fixed by the wire protocol. Unknown event types decode to
/// [`StreamEvent::Unknown`] and are ignored downstream rather than trusted
/// structurally.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Stream opened; carries the skeleton of the message being generated
    MessageStart { message: serde_json::Value },

    /// A content block at `index` opened
    ContentBlockStart {
        index: usize,
        content_block: StartedBlock,
    },

    /// Incremental payload for the block at `index`
    ContentBlockDelta { index: usize, delta: ContentDelta },

    /// The block at `index` closed
    ContentBlockStop { index: usize },

    /// Message-level delta (stop reason, usage totals)
    MessageDelta {
        delta: MessageDeltaPayload,
        #[serde(default)]
        usage: Option<Usage>,
    },

    /// Stream finished
    MessageStop,

    /// Keepalive
    Ping,

    /// Server-reported error event
    Error { error: ApiErrorPayload },

    /// Any event type this client does not know about
    #[serde(other)]
    Unknown,
}

/// The opening shape of a content block
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StartedBlock {
    /// A run of plain text
    Text {
        #[serde(default)]
        text: String,
    },
    /// A tool invocation whose input streams in as partial JSON
    ToolUse {
        #[serde(default)]
        id: String,
        name: String,
    },
    /// Unknown block kinds are carried but produce no output
    #[serde(other)]
    Unknown,
}

/// Incremental content inside a block
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentDelta {
    /// Text appended to a text block
    TextDelta { text: String },
    /// A fragment of a tool call's JSON input
    InputJsonDelta { partial_json: String },
    /// Unknown delta kinds are ignored
    #[serde(other)]
    Unknown,
}

/// Message-level delta payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageDeltaPayload {
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub stop_sequence: Option<String>,
}

/// Token accounting attached to message deltas
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

/// Server error reported inside the stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorPayload {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

/// A fully-assembled tool invocation: name plus parsed structured input
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub name: String,
    pub input: serde_json::Value,
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            input,
        }
    }
}

/// One observable output of the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    /// An incremental text chunk, yielded as it arrives
    Text(String),
    /// A completed tool invocation, yielded when its block closes
    ToolUse(ToolInvocation),
}
