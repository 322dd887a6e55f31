//! Completion calls against a single Claude model on Vertex AI.

use crate::client::Client;
use crate::error::AnthropicVertexError;
use crate::streaming::StreamingResponse;
use crate::types::{CompletionRequest, CompletionResponse, DEFAULT_MAX_TOKENS};

/// Default max tokens for different Claude models
pub fn default_max_tokens_for_model(model: &str) -> u32 {
    if model.contains("opus") {
        32000
    } else if model.contains("sonnet") || model.contains("haiku") {
        8192
    } else {
        DEFAULT_MAX_TOKENS
    }
}

/// Completion model for Anthropic Claude on Vertex AI.
#[derive(Clone)]
pub struct CompletionModel {
    client: Client,
    model: String,
}

impl CompletionModel {
    /// Create a new completion model.
    pub fn new(client: Client, model: String) -> Self {
        Self { client, model }
    }

    /// Get the model identifier.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Non-streaming completion via `rawPredict`.
    pub async fn complete(
        &self,
        mut request: CompletionRequest,
    ) -> Result<CompletionResponse, AnthropicVertexError> {
        request.stream = None;
        let response = self.send(request, "rawPredict").await?;

        let body = response.text().await?;
        let parsed: CompletionResponse = serde_json::from_str(&body)?;
        Ok(parsed)
    }

    /// Streaming completion via `streamRawPredict`.
    ///
    /// HTTP-level failures are returned here; failures after the stream has
    /// started arrive as `Err` items on the returned stream.
    pub async fn stream(
        &self,
        mut request: CompletionRequest,
    ) -> Result<StreamingResponse, AnthropicVertexError> {
        request.stream = Some(true);
        let response = self.send(request, "streamRawPredict").await?;
        Ok(StreamingResponse::new(response))
    }

    async fn send(
        &self,
        request: CompletionRequest,
        operation: &str,
    ) -> Result<reqwest::Response, AnthropicVertexError> {
        let url = self.client.endpoint_url(&self.model, operation);
        let headers = self.client.build_headers().await?;

        tracing::debug!(
            "[vertex] {} model={} messages={} max_tokens={}",
            operation,
            self.model,
            request.messages.len(),
            request.max_tokens
        );

        let response = self
            .client
            .http_client()
            .post(&url)
            .headers(headers)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!("[vertex] {} returned {}", operation, status);
            return Err(AnthropicVertexError::from_status(status, body));
        }

        Ok(response)
    }
}

impl std::fmt::Debug for CompletionModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionModel")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_max_tokens_by_family() {
        assert_eq!(default_max_tokens_for_model("claude-opus-4-5@20251101"), 32000);
        assert_eq!(default_max_tokens_for_model("claude-sonnet-4-5@20250929"), 8192);
        assert_eq!(default_max_tokens_for_model("something-else"), DEFAULT_MAX_TOKENS);
    }
}
