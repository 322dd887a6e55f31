//! Anthropic Claude models on Google Cloud Vertex AI.
//!
//! A small client for the `rawPredict` / `streamRawPredict` endpoints used by
//! archform. It builds Anthropic Messages API requests (text and base64 image
//! content), authenticates with Google Cloud, and parses the SSE stream into
//! ordered text deltas.
//!
//! Rate limiting (HTTP 429, `overloaded_error`, `rate_limit_error`) surfaces as
//! [`AnthropicVertexError::Throttled`] so callers can retry it separately from
//! every other failure.
//!
//! # Example
//!
//! ```rust,no_run
//! use archform_vertex::{Client, CompletionRequest, Message};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::from_service_account(
//!         "/path/to/service-account.json",
//!         "your-project-id",
//!         "us-east5",
//!     )
//!     .await?;
//!
//!     let model = client.completion_model("claude-sonnet-4-5@20250929");
//!     let request = CompletionRequest {
//!         messages: vec![Message::user("Describe this architecture.")],
//!         ..Default::default()
//!     };
//!     let response = model.complete(request).await?;
//!     println!("{}", response.text());
//!     Ok(())
//! }
//! ```

mod client;
mod completion;
mod error;
mod streaming;
mod types;

pub use client::Client;
pub use completion::{default_max_tokens_for_model, CompletionModel};
pub use error::AnthropicVertexError;
pub use streaming::{StreamChunk, StreamingResponse};
pub use types::*;

/// Claude models available on Vertex AI
pub mod models {
    /// Claude Opus 4.5
    pub const CLAUDE_OPUS_4_5: &str = "claude-opus-4-5@20251101";
    /// Claude Sonnet 4.5
    pub const CLAUDE_SONNET_4_5: &str = "claude-sonnet-4-5@20250929";
    /// Claude Haiku 4.5 - used for short summarisation calls
    pub const CLAUDE_HAIKU_4_5: &str = "claude-haiku-4-5@20251001";
}
