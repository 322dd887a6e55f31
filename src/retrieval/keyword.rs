//! Offline reference index ranked by word overlap.
//!
//! Reads the ingestion manifest, a JSON array of
//! `{referenceTemplateLocation, referenceImageLocation}`, loads each template
//! through the blob store and scores candidates by the share of query words
//! that appear in the template text.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::blob::BlobStore;
use super::{ReferenceIndex, SearchHit, SearchMode};
use crate::store::ReferenceMetadata;

struct Entry {
    metadata: ReferenceMetadata,
    words: HashSet<String>,
}

pub struct KeywordReferenceIndex {
    entries: Vec<Entry>,
}

fn words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 2)
        .map(str::to_lowercase)
        .collect()
}

impl KeywordReferenceIndex {
    /// Build from already-loaded `(metadata, template text)` pairs.
    pub fn from_documents(documents: Vec<(ReferenceMetadata, String)>) -> Self {
        let entries = documents
            .into_iter()
            .map(|(metadata, text)| Entry {
                metadata,
                words: words(&text),
            })
            .collect();
        Self { entries }
    }

    /// Load the manifest and every template it names. Templates missing
    /// from the blob store are skipped.
    pub async fn load(manifest_path: &Path, blobs: &dyn BlobStore) -> Result<Self> {
        let manifest = tokio::fs::read_to_string(manifest_path)
            .await
            .with_context(|| format!("Failed to read reference manifest {:?}", manifest_path))?;
        let references: Vec<ReferenceMetadata> =
            serde_json::from_str(&manifest).context("Failed to parse reference manifest")?;

        let mut documents = Vec::with_capacity(references.len());
        for metadata in references {
            match blobs.get(&metadata.reference_template_location).await? {
                Some(bytes) => {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    documents.push((metadata, text));
                }
                None => tracing::warn!(
                    "[retrieval] manifest entry {} has no template blob, skipping",
                    metadata.reference_template_location
                ),
            }
        }

        tracing::info!("[retrieval] keyword index loaded {} references", documents.len());
        Ok(Self::from_documents(documents))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ReferenceIndex for KeywordReferenceIndex {
    async fn search(&self, query: &str, top_k: usize, mode: SearchMode) -> Result<Vec<SearchHit>> {
        if mode == SearchMode::Semantic {
            tracing::debug!("[retrieval] keyword index has no vectors, ranking lexically");
        }

        let query_words = words(query);
        if query_words.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits: Vec<SearchHit> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let overlap = query_words.intersection(&entry.words).count();
                (overlap > 0).then(|| SearchHit {
                    score: overlap as f32 / query_words.len() as f32,
                    metadata: entry.metadata.clone(),
                })
            })
            .collect();

        // Stable sort keeps manifest order among equal scores.
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }
}
