//! Retrieval Gateway: reference templates for a session.
//!
//! The first retrieval in a session summarises the query into a service list,
//! searches the reference index and pins the resulting locations in the
//! store's `METADATA` slot. Every later call in that session returns the
//! pinned set, whatever the query, so generated templates keep a stable style
//! across the conversation.

pub mod blob;
pub mod http;
pub mod keyword;

use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ArchformError;
use crate::llm::{InferenceParams, ModelClient, RetryPolicy};
use crate::prompts;
use crate::store::{ReferenceMetadata, TemplateStore};

pub use blob::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use http::HttpReferenceIndex;
pub use keyword::KeywordReferenceIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SearchMode {
    /// Lexical and vector ranking combined
    Hybrid,
    Semantic,
}

impl FromStr for SearchMode {
    type Err = ArchformError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hybrid" => Ok(SearchMode::Hybrid),
            "semantic" => Ok(SearchMode::Semantic),
            other => Err(ArchformError::Internal(format!(
                "unknown search mode '{}'",
                other
            ))),
        }
    }
}

/// One ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub score: f32,
    pub metadata: ReferenceMetadata,
}

#[async_trait]
pub trait ReferenceIndex: Send + Sync {
    async fn search(&self, query: &str, top_k: usize, mode: SearchMode) -> Result<Vec<SearchHit>>;
}

/// Reference diagram bytes for display.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceImage {
    pub location: String,
    pub bytes: Vec<u8>,
}

/// Tunables for [`RetrievalGateway`].
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub search_mode: SearchMode,
    /// Summaries longer than this are cut before searching
    pub max_query_chars: usize,
    pub summary_model: String,
    pub summary_params: InferenceParams,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            search_mode: SearchMode::Hybrid,
            max_query_chars: 1000,
            summary_model: archform_vertex::models::CLAUDE_HAIKU_4_5.to_string(),
            summary_params: InferenceParams {
                max_tokens: 1024,
                ..InferenceParams::default()
            },
        }
    }
}

pub struct RetrievalGateway {
    index: Arc<dyn ReferenceIndex>,
    blobs: Arc<dyn BlobStore>,
    store: Arc<dyn TemplateStore>,
    model: Arc<dyn ModelClient>,
    retry: RetryPolicy,
    config: RetrievalConfig,
}

impl RetrievalGateway {
    pub fn new(
        index: Arc<dyn ReferenceIndex>,
        blobs: Arc<dyn BlobStore>,
        store: Arc<dyn TemplateStore>,
        model: Arc<dyn ModelClient>,
        retry: RetryPolicy,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            index,
            blobs,
            store,
            model,
            retry,
            config,
        }
    }

    /// Reference locations for the session, pinned on first success.
    pub async fn retrieve(
        &self,
        session_id: &str,
        query: &str,
    ) -> Result<Vec<ReferenceMetadata>, ArchformError> {
        if let Some(cached) = self.store.get_reference_metadata(session_id).await? {
            tracing::debug!("[retrieval] {} cache hit ({} references)", session_id, cached.len());
            return Ok(cached);
        }

        let summary = self.summarize(query).await?;
        let hits = self
            .index
            .search(&summary, self.config.top_k, self.config.search_mode)
            .await
            .map_err(|e| ArchformError::RemoteCallFailed(format!("reference search failed: {:#}", e)))?;

        if hits.is_empty() {
            tracing::info!("[retrieval] {} no references found", session_id);
            return Ok(Vec::new());
        }

        let documents: Vec<ReferenceMetadata> = hits
            .into_iter()
            .take(self.config.top_k)
            .map(|hit| hit.metadata)
            .collect();
        let stored = self
            .store
            .put_reference_metadata(session_id, &documents)
            .await?;

        tracing::info!("[retrieval] {} pinned {} references", session_id, stored.len());
        Ok(stored)
    }

    /// Reference template texts for the session. References whose blob is
    /// missing are skipped.
    pub async fn fetch_reference_documents(
        &self,
        session_id: &str,
        query: &str,
    ) -> Result<Vec<String>, ArchformError> {
        let references = self.retrieve(session_id, query).await?;

        let mut documents = Vec::with_capacity(references.len());
        for reference in &references {
            if let Some(bytes) = self.fetch_blob(&reference.reference_template_location).await {
                documents.push(String::from_utf8_lossy(&bytes).into_owned());
            }
        }
        Ok(documents)
    }

    /// Reference diagrams for display. Uses only the pinned set; a session
    /// that has not retrieved yet has no images.
    pub async fn fetch_reference_images(
        &self,
        session_id: &str,
    ) -> Result<Vec<ReferenceImage>, ArchformError> {
        let Some(references) = self.store.get_reference_metadata(session_id).await? else {
            return Ok(Vec::new());
        };

        let mut images = Vec::with_capacity(references.len());
        for reference in references {
            if let Some(bytes) = self.fetch_blob(&reference.reference_image_location).await {
                images.push(ReferenceImage {
                    location: reference.reference_image_location,
                    bytes,
                });
            }
        }
        Ok(images)
    }

    async fn fetch_blob(&self, location: &str) -> Option<Vec<u8>> {
        match self.blobs.get(location).await {
            Ok(Some(bytes)) => Some(bytes),
            Ok(None) => {
                tracing::warn!("[retrieval] reference blob missing: {}", location);
                None
            }
            Err(e) => {
                tracing::warn!("[retrieval] failed to read reference blob {}: {:#}", location, e);
                None
            }
        }
    }

    /// Service-list summary of `query`, cut to the index's query limit.
    async fn summarize(&self, query: &str) -> Result<String, ArchformError> {
        let prompt = prompts::summarize(query);

        let summary = self
            .retry
            .run("summarize", None, || {
                self.model.invoke(
                    &self.config.summary_model,
                    &prompt.system,
                    &prompt.messages,
                    &self.config.summary_params,
                    None,
                )
            })
            .await
            .map_err(|e| ArchformError::RemoteCallFailed(format!("summary call failed: {}", e)))?;

        Ok(truncate_chars(summary.trim(), self.config.max_query_chars))
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
