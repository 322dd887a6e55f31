//! Model invocation seam.
//!
//! The orchestrator talks to a language model only through [`ModelClient`]:
//! a model id, a system instruction, role-tagged content blocks and sampling
//! parameters in, aggregated text out. Partial text is pushed to an optional
//! [`TextSink`] as it streams. Throttling is reported as
//! [`ModelError::Throttled`] so [`RetryPolicy`] can tell it apart from
//! everything else.

pub mod retry;
pub mod vertex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::settings::schema::AiSettings;

pub use retry::{RetryError, RetryPolicy, RetryStats, Retryable};
pub use vertex::VertexModelClient;

/// Speaker of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One piece of message content.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text(String),
    Image { media_type: String, bytes: Vec<u8> },
}

/// A role-tagged message.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl ChatMessage {
    pub fn user(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content,
        }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self::user(vec![ContentBlock::Text(text.into())])
    }

    /// Concatenated text blocks, used by tests and logging.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text(text) => Some(text.as_str()),
                ContentBlock::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Sampling parameters for one call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InferenceParams {
    pub max_tokens: u32,
    /// 0.0 - 1.0
    pub temperature: f32,
    /// 0.0 - 1.0
    pub top_p: f32,
    /// 0 - 500
    pub top_k: u32,
}

impl InferenceParams {
    /// Clamp every field into its documented range.
    pub fn clamped(self) -> Self {
        Self {
            max_tokens: self.max_tokens.max(1),
            temperature: self.temperature.clamp(0.0, 1.0),
            top_p: self.top_p.clamp(0.0, 1.0),
            top_k: self.top_k.min(500),
        }
    }
}

impl Default for InferenceParams {
    fn default() -> Self {
        Self {
            max_tokens: 8192,
            temperature: 0.0,
            top_p: 1.0,
            top_k: 250,
        }
    }
}

impl From<&AiSettings> for InferenceParams {
    fn from(ai: &AiSettings) -> Self {
        Self {
            max_tokens: ai.max_tokens,
            temperature: ai.temperature,
            top_p: ai.top_p,
            top_k: ai.top_k,
        }
        .clamped()
    }
}

/// Receives streamed model output.
///
/// Chunks arrive in order and concatenate to the final text of the attempt.
pub trait TextSink: Send + Sync {
    fn on_partial_text(&self, text: &str);

    /// Called before a throttled call is retried. Text delivered since the
    /// previous attempt started belongs to the abandoned attempt.
    fn on_retry(&self, _attempt: u32) {}
}

/// Sink that discards everything.
pub struct NoopSink;

impl TextSink for NoopSink {
    fn on_partial_text(&self, _text: &str) {}
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
    /// Rate limited or overloaded; safe to retry
    #[error("model throttled: {0}")]
    Throttled(String),

    #[error("model call failed: {0}")]
    Failed(String),
}

impl Retryable for ModelError {
    fn is_retryable(&self) -> bool {
        matches!(self, ModelError::Throttled(_))
    }
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Issue one request and return the aggregated response text.
    async fn invoke(
        &self,
        model_id: &str,
        system: &str,
        messages: &[ChatMessage],
        params: &InferenceParams,
        sink: Option<&dyn TextSink>,
    ) -> Result<String, ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_are_clamped() {
        let params = InferenceParams {
            max_tokens: 0,
            temperature: 1.7,
            top_p: -0.2,
            top_k: 900,
        }
        .clamped();
        assert_eq!(params.max_tokens, 1);
        assert_eq!(params.temperature, 1.0);
        assert_eq!(params.top_p, 0.0);
        assert_eq!(params.top_k, 500);
    }

    #[test]
    fn test_params_from_settings() {
        let params = InferenceParams::from(&AiSettings::default());
        assert_eq!(params.temperature, 0.0);
        assert_eq!(params.top_p, 1.0);
        assert_eq!(params.top_k, 250);
    }

    #[test]
    fn test_message_text_skips_images() {
        let message = ChatMessage::user(vec![
            ContentBlock::Text("Explain ".to_string()),
            ContentBlock::Image {
                media_type: "image/png".to_string(),
                bytes: vec![1, 2, 3],
            },
            ContentBlock::Text("this".to_string()),
        ]);
        assert_eq!(message.text(), "Explain this");
        assert_eq!(message.role, Role::User);
    }

    #[test]
    fn test_only_throttled_is_retryable() {
        assert!(ModelError::Throttled("429".into()).is_retryable());
        assert!(!ModelError::Failed("400".into()).is_retryable());
    }
}
