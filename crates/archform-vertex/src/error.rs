//! Error types for the Anthropic Vertex AI client.

use thiserror::Error;

/// Errors that can occur when talking to Anthropic models on Vertex AI.
#[derive(Debug, Error)]
pub enum AnthropicVertexError {
    /// Failed to authenticate with Google Cloud
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    /// Failed to load service account credentials
    #[error("Failed to load credentials from {path}: {message}")]
    CredentialsError { path: String, message: String },

    /// HTTP request failed before a response was received
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The endpoint is rate limiting or overloaded; safe to retry later
    #[error("Throttled ({status}): {message}")]
    Throttled { status: u16, message: String },

    /// API returned a non-retryable error response
    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// The SSE stream broke or reported an error event
    #[error("Streaming error: {0}")]
    StreamError(String),

    /// Token refresh error
    #[error("Failed to refresh token: {0}")]
    TokenRefreshError(String),
}

impl AnthropicVertexError {
    /// Whether this error is a throttling condition.
    pub fn is_throttled(&self) -> bool {
        matches!(self, AnthropicVertexError::Throttled { .. })
    }

    /// Classify an HTTP error status and body.
    ///
    /// 429 (rate limit) and 529 (overloaded) are throttling; everything else is
    /// an API error.
    pub fn from_status(status: u16, body: String) -> Self {
        let message = extract_error_message(&body).unwrap_or(body);
        match status {
            429 | 529 => AnthropicVertexError::Throttled { status, message },
            _ => AnthropicVertexError::ApiError { status, message },
        }
    }

    /// Classify an `error` event received mid-stream.
    pub fn from_stream_error(error_type: &str, message: String) -> Self {
        match error_type {
            "overloaded_error" => AnthropicVertexError::Throttled {
                status: 529,
                message,
            },
            "rate_limit_error" => AnthropicVertexError::Throttled {
                status: 429,
                message,
            },
            _ => AnthropicVertexError::StreamError(format!("{}: {}", error_type, message)),
        }
    }
}

/// Pull `error.message` out of an Anthropic error body, if it is one.
fn extract_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .map(str::to_string)
}

impl From<gcp_auth::Error> for AnthropicVertexError {
    fn from(err: gcp_auth::Error) -> Self {
        AnthropicVertexError::AuthenticationError(err.to_string())
    }
}

impl From<serde_json::Error> for AnthropicVertexError {
    fn from(err: serde_json::Error) -> Self {
        AnthropicVertexError::ParseError(err.to_string())
    }
}
