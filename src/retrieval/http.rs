//! Remote similarity search over HTTP.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ReferenceIndex, SearchHit, SearchMode};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest<'a> {
    query_text: &'a str,
    top_k: usize,
    search_mode: SearchMode,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

/// Posts `{queryText, topK, searchMode}` and reads `{results: [{score, metadata}]}`.
pub struct HttpReferenceIndex {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpReferenceIndex {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to build retrieval HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }
}

#[async_trait]
impl ReferenceIndex for HttpReferenceIndex {
    async fn search(&self, query: &str, top_k: usize, mode: SearchMode) -> Result<Vec<SearchHit>> {
        let mut request = self.client.post(&self.endpoint).json(&SearchRequest {
            query_text: query,
            top_k,
            search_mode: mode,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Retrieval request to {} failed", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Retrieval endpoint returned {}: {}", status, body);
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .context("Failed to parse retrieval response")?;
        Ok(parsed.results.into_iter().take(top_k).collect())
    }
}
