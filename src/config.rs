//! Configuration helpers for the Resilient Agent SDK

use std::env;

/// Default public endpoint for the Messages API
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

/// Get the base URL from the environment or a fallback
///
/// Priority:
/// 1. RESILIENT_AGENT_BASE_URL environment variable
/// 2. fallback parameter
/// 3. [`DEFAULT_BASE_URL`]
///
/// # Examples
///
/// ```rust,no_run
/// use resilient_agent::get_base_url;
///
/// // Read from environment, falling back to the public endpoint
/// let url = get_base_url(None);
///
/// // With an explicit fallback (e.g. a local proxy)
/// let url = get_base_url(Some("http://localhost:9000/v1"));
/// ```
pub fn get_base_url(fallback: Option<&str>) -> String {
    if let Ok(url) = env::var("RESILIENT_AGENT_BASE_URL") {
        return url;
    }

    fallback.unwrap_or(DEFAULT_BASE_URL).to_string()
}

/// Get the API key from the environment
///
/// Reads RESILIENT_AGENT_API_KEY. Returns `None` when unset so callers can
/// decide whether a missing key is an error for their deployment.
pub fn get_api_key() -> Option<String> {
    env::var("RESILIENT_AGENT_API_KEY").ok()
}

/// Get the model name from the environment or a fallback
///
/// Priority:
/// 1. RESILIENT_AGENT_MODEL environment variable
/// 2. fallback parameter
pub fn get_model(fallback: &str) -> String {
    env::var("RESILIENT_AGENT_MODEL").unwrap_or_else(|_| fallback.to_string())
}
