//! Remote template validator over HTTP.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{TemplateValidator, ValidationOutcome};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ValidateRequest<'a> {
    document_text: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidateResponse {
    valid: bool,
    #[serde(default)]
    error_text: Option<String>,
}

/// Posts `{documentText}` and reads `{valid, errorText?}`.
pub struct HttpTemplateValidator {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpTemplateValidator {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to build validator HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }
}

impl From<ValidateResponse> for ValidationOutcome {
    fn from(response: ValidateResponse) -> Self {
        if response.valid {
            ValidationOutcome::valid()
        } else {
            ValidationOutcome::invalid(
                response
                    .error_text
                    .unwrap_or_else(|| "Template invalid".to_string()),
            )
        }
    }
}

#[async_trait]
impl TemplateValidator for HttpTemplateValidator {
    async fn validate(&self, content: &str) -> Result<ValidationOutcome> {
        let mut request = self.client.post(&self.endpoint).json(&ValidateRequest {
            document_text: content,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Validator request to {} failed", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Validator returned {}: {}", status, body);
        }

        let parsed: ValidateResponse = response
            .json()
            .await
            .context("Failed to parse validator response")?;
        Ok(parsed.into())
    }
}
