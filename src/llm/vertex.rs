//! [`ModelClient`] backed by Anthropic models on Vertex AI.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;

use archform_vertex::{AnthropicVertexError, Client, CompletionRequest, StreamChunk};

use super::{ChatMessage, ContentBlock, InferenceParams, ModelClient, ModelError, Role, TextSink};

pub struct VertexModelClient {
    client: Client,
}

impl VertexModelClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from a service account file, or from Application
    /// Default Credentials when no file is given.
    pub async fn connect(
        credentials_path: Option<&Path>,
        project_id: &str,
        location: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let client = match credentials_path {
            Some(path) => {
                Client::from_service_account_with_timeout(path, project_id, location, timeout)
                    .await
                    .with_context(|| format!("Failed to load Vertex AI credentials {:?}", path))?
            }
            None => Client::from_env(project_id, location, timeout)
                .await
                .context("Failed to obtain default Google Cloud credentials")?,
        };
        tracing::info!(
            "[vertex] connected project={} location={}",
            client.project_id(),
            client.location()
        );
        Ok(Self::new(client))
    }
}

fn to_wire_message(message: &ChatMessage) -> archform_vertex::Message {
    let content = message
        .content
        .iter()
        .map(|block| match block {
            ContentBlock::Text(text) => archform_vertex::ContentBlock::Text { text: text.clone() },
            ContentBlock::Image { media_type, bytes } => archform_vertex::ContentBlock::Image {
                source: archform_vertex::ImageSource::base64(media_type.clone(), bytes),
            },
        })
        .collect();

    archform_vertex::Message {
        role: match message.role {
            Role::User => archform_vertex::Role::User,
            Role::Assistant => archform_vertex::Role::Assistant,
        },
        content,
    }
}

fn build_request(
    system: &str,
    messages: &[ChatMessage],
    params: &InferenceParams,
) -> CompletionRequest {
    CompletionRequest {
        messages: messages.iter().map(to_wire_message).collect(),
        max_tokens: params.max_tokens,
        system: (!system.is_empty()).then(|| system.to_string()),
        temperature: Some(params.temperature),
        top_p: Some(params.top_p),
        top_k: Some(params.top_k),
        ..Default::default()
    }
}

impl From<AnthropicVertexError> for ModelError {
    fn from(err: AnthropicVertexError) -> Self {
        if err.is_throttled() {
            ModelError::Throttled(err.to_string())
        } else {
            ModelError::Failed(err.to_string())
        }
    }
}

#[async_trait]
impl ModelClient for VertexModelClient {
    async fn invoke(
        &self,
        model_id: &str,
        system: &str,
        messages: &[ChatMessage],
        params: &InferenceParams,
        sink: Option<&dyn TextSink>,
    ) -> Result<String, ModelError> {
        let model = self.client.completion_model(model_id);
        let request = build_request(system, messages, params);

        let Some(sink) = sink else {
            let response = model.complete(request).await?;
            return Ok(response.text());
        };

        let mut stream = model.stream(request).await?;
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk? {
                StreamChunk::TextDelta { text: delta } => {
                    sink.on_partial_text(&delta);
                    text.push_str(&delta);
                }
                StreamChunk::Done {
                    stop_reason,
                    output_tokens,
                } => {
                    tracing::debug!(
                        "[vertex] {} finished: {:?}, {:?} output tokens",
                        model_id,
                        stop_reason,
                        output_tokens
                    );
                }
            }
        }
        Ok(text)
    }
}
