//! Authenticated HTTP client for Anthropic models on Vertex AI.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use gcp_auth::{CustomServiceAccount, TokenProvider};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

use crate::completion::CompletionModel;
use crate::error::AnthropicVertexError;

/// Vertex AI endpoint URL template
const VERTEX_AI_ENDPOINT: &str =
    "https://{location}-aiplatform.googleapis.com/v1/projects/{project}/locations/{location}/publishers/anthropic/models/{model}";

/// OAuth2 scope for Vertex AI
const VERTEX_AI_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Template generation produces large outputs; allow a long read.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Clone)]
enum Credentials {
    ServiceAccount(Arc<CustomServiceAccount>),
    Default(Arc<dyn TokenProvider>),
}

impl Credentials {
    async fn token(&self, scopes: &[&str]) -> Result<Arc<gcp_auth::Token>, gcp_auth::Error> {
        match self {
            Credentials::ServiceAccount(sa) => sa.token(scopes).await,
            Credentials::Default(provider) => provider.token(scopes).await,
        }
    }
}

/// Client for Anthropic models on Google Cloud Vertex AI.
#[derive(Clone)]
pub struct Client {
    http_client: reqwest::Client,
    project_id: String,
    location: String,
    credentials: Credentials,
}

impl Client {
    /// Create a client from a service account JSON file.
    pub async fn from_service_account(
        credentials_path: impl AsRef<Path>,
        project_id: impl Into<String>,
        location: impl Into<String>,
    ) -> Result<Self, AnthropicVertexError> {
        Self::from_service_account_with_timeout(
            credentials_path,
            project_id,
            location,
            DEFAULT_REQUEST_TIMEOUT,
        )
        .await
    }

    /// Create a client from a service account JSON file with an explicit
    /// request timeout.
    pub async fn from_service_account_with_timeout(
        credentials_path: impl AsRef<Path>,
        project_id: impl Into<String>,
        location: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AnthropicVertexError> {
        let path = credentials_path.as_ref();

        let service_account = CustomServiceAccount::from_file(path).map_err(|e| {
            AnthropicVertexError::CredentialsError {
                path: path.display().to_string(),
                message: e.to_string(),
            }
        })?;

        Ok(Self {
            http_client: build_http_client(timeout)?,
            project_id: project_id.into(),
            location: location.into(),
            credentials: Credentials::ServiceAccount(Arc::new(service_account)),
        })
    }

    /// Create a client using Application Default Credentials
    /// (`GOOGLE_APPLICATION_CREDENTIALS` or the gcloud defaults).
    pub async fn from_env(
        project_id: impl Into<String>,
        location: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AnthropicVertexError> {
        let provider = gcp_auth::provider()
            .await
            .map_err(|e| AnthropicVertexError::AuthenticationError(e.to_string()))?;

        Ok(Self {
            http_client: build_http_client(timeout)?,
            project_id: project_id.into(),
            location: location.into(),
            credentials: Credentials::Default(provider),
        })
    }

    /// Get a completion model handle for `model` (e.g. `claude-sonnet-4-5@20250929`).
    pub fn completion_model(&self, model: &str) -> CompletionModel {
        CompletionModel::new(self.clone(), model.to_string())
    }

    /// Build the endpoint URL for a model and operation
    /// (`rawPredict` or `streamRawPredict`).
    pub(crate) fn endpoint_url(&self, model: &str, operation: &str) -> String {
        let base = VERTEX_AI_ENDPOINT
            .replace("{location}", &self.location)
            .replace("{project}", &self.project_id)
            .replace("{model}", model);
        format!("{}:{}", base, operation)
    }

    pub(crate) async fn build_headers(&self) -> Result<HeaderMap, AnthropicVertexError> {
        let token = self
            .credentials
            .token(&[VERTEX_AI_SCOPE])
            .await
            .map_err(|e| AnthropicVertexError::TokenRefreshError(e.to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token.as_str()))
                .map_err(|e| AnthropicVertexError::ConfigError(e.to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        Ok(headers)
    }

    pub(crate) fn http_client(&self) -> &reqwest::Client {
        &self.http_client
    }

    /// Google Cloud project ID.
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Vertex AI location.
    pub fn location(&self) -> &str {
        &self.location
    }
}

fn build_http_client(timeout: Duration) -> Result<reqwest::Client, AnthropicVertexError> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .timeout(timeout)
        .build()
        .map_err(AnthropicVertexError::HttpError)
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("project_id", &self.project_id)
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}
