//! Error types for the Resilient Agent SDK
//!
//! The error taxonomy is a closed enum so callers can pattern-match
//! exhaustively and get a fixed retryability answer per variant. Transient
//! failures (network, timeout, rate limit, server, open circuit) are
//! retryable; terminal failures (authentication, validation, malformed
//! stream) are not.

use std::time::Duration;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the SDK
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Transport-level failure (connection refused, DNS, dropped socket)
    #[error("network error: {message}")]
    Network {
        message: String,
        request_id: Option<String>,
    },

    /// No response (or no stream event) arrived within the allotted window
    #[error("request timed out: {message}")]
    Timeout {
        message: String,
        request_id: Option<String>,
    },

    /// Rejected credentials (HTTP 401/403)
    #[error("authentication failed: {message}")]
    Authentication {
        message: String,
        request_id: Option<String>,
        status_code: Option<u16>,
    },

    /// Server asked us to back off (HTTP 429)
    #[error("rate limited: {message}")]
    RateLimit {
        message: String,
        request_id: Option<String>,
        status_code: Option<u16>,
        /// Server-suggested pause before the next attempt, if one was sent
        retry_after: Option<Duration>,
    },

    /// The request itself was malformed (HTTP 400/422)
    #[error("invalid request: {message}")]
    Validation {
        message: String,
        request_id: Option<String>,
        status_code: Option<u16>,
    },

    /// Server-side failure (HTTP 5xx or an in-stream overload report)
    #[error("server error: {message}")]
    Server {
        message: String,
        request_id: Option<String>,
        status_code: Option<u16>,
    },

    /// The response stream could not be decoded
    #[error("stream error: {message}")]
    Stream {
        message: String,
        request_id: Option<String>,
    },

    /// The circuit breaker is open and rejected the call without dialing out
    #[error("circuit breaker open, retry in {recovery_time:?}")]
    CircuitOpen {
        request_id: Option<String>,
        /// Time remaining until the breaker will probe again
        recovery_time: Duration,
    },
}

impl Error {
    /// Create a network error
    pub fn network(msg: impl Into<String>) -> Self {
        Error::Network {
            message: msg.into(),
            request_id: None,
        }
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Error::Timeout {
            message: msg.into(),
            request_id: None,
        }
    }

    /// Create a stream decoding error
    pub fn stream(msg: impl Into<String>) -> Self {
        Error::Stream {
            message: msg.into(),
            request_id: None,
        }
    }

    /// Create a validation error with no associated HTTP status
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation {
            message: msg.into(),
            request_id: None,
            status_code: None,
        }
    }

    /// Create a rate-limit error with an optional server-suggested delay
    pub fn rate_limited(msg: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Error::RateLimit {
            message: msg.into(),
            request_id: None,
            status_code: Some(429),
            retry_after,
        }
    }

    /// Create a circuit-open rejection
    pub fn circuit_open(recovery_time: Duration) -> Self {
        Error::CircuitOpen {
            request_id: None,
            recovery_time,
        }
    }

    /// Classify an HTTP error response into the typed taxonomy.
    ///
    /// `retry_after` is the parsed `Retry-After` value when the server sent
    /// one; it is only meaningful for 429 responses.
    ///
    /// - 401/403 → [`Error::Authentication`] (not retryable)
    /// - 429 → [`Error::RateLimit`] (retryable)
    /// - 400/422 → [`Error::Validation`] (not retryable)
    /// - any other 4xx → [`Error::Validation`]
    /// - 5xx → [`Error::Server`] (retryable)
    pub fn from_http_status(
        status: u16,
        body: impl Into<String>,
        request_id: Option<String>,
        retry_after: Option<Duration>,
    ) -> Self {
        let message = body.into();
        match status {
            401 | 403 => Error::Authentication {
                message,
                request_id,
                status_code: Some(status),
            },
            429 => Error::RateLimit {
                message,
                request_id,
                status_code: Some(status),
                retry_after,
            },
            400 | 422 => Error::Validation {
                message,
                request_id,
                status_code: Some(status),
            },
            s if s >= 500 => Error::Server {
                message,
                request_id,
                status_code: Some(status),
            },
            _ => Error::Validation {
                message,
                request_id,
                status_code: Some(status),
            },
        }
    }

    /// Whether this error is worth retrying.
    ///
    /// This is a fixed property of the variant, not of the particular
    /// failure instance.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network { .. } => true,
            Error::Timeout { .. } => true,
            Error::RateLimit { .. } => true,
            Error::Server { .. } => true,
            Error::CircuitOpen { .. } => true,
            Error::Authentication { .. } => false,
            Error::Validation { .. } => false,
            Error::Stream { .. } => false,
        }
    }

    /// The correlating request id, when one was attached
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Error::Network { request_id, .. }
            | Error::Timeout { request_id, .. }
            | Error::Authentication { request_id, .. }
            | Error::RateLimit { request_id, .. }
            | Error::Validation { request_id, .. }
            | Error::Server { request_id, .. }
            | Error::Stream { request_id, .. }
            | Error::CircuitOpen { request_id, .. } => request_id.as_deref(),
        }
    }

    /// The HTTP status that produced this error, when one applies
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Authentication { status_code, .. }
            | Error::RateLimit { status_code, .. }
            | Error::Validation { status_code, .. }
            | Error::Server { status_code, .. } => *status_code,
            _ => None,
        }
    }

    /// Attach a correlating request id, replacing any existing one
    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        match &mut self {
            Error::Network { request_id, .. }
            | Error::Timeout { request_id, .. }
            | Error::Authentication { request_id, .. }
            | Error::RateLimit { request_id, .. }
            | Error::Validation { request_id, .. }
            | Error::Server { request_id, .. }
            | Error::Stream { request_id, .. }
            | Error::CircuitOpen { request_id, .. } => *request_id = Some(id),
        }
        self
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::timeout(err.to_string())
        } else {
            Error::network(err.to_string())
        }
    }
}
