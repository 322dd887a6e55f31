//! Settings schema definitions for archform configuration.
//!
//! All settings structs use `#[serde(default)]` to allow partial configuration files.
//! Missing fields are filled with sensible defaults.

use serde::{Deserialize, Serialize};

/// Root settings structure for archform.
///
/// Loaded from `~/.archform/settings.toml` with environment variable interpolation support.
/// Version field enables future migrations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchformSettings {
    /// Schema version for migrations
    pub version: u32,

    /// Model provider configuration
    pub ai: AiSettings,

    /// Backoff for throttled model calls
    pub retry: RetrySettings,

    /// Reference template search
    pub retrieval: RetrievalSettings,

    /// Where reference templates and images are read from
    pub blob: BlobSettings,

    /// Template validator
    pub validation: ValidationSettings,

    /// Template Store backend
    pub storage: StorageSettings,

    /// Conversation loop behavior
    pub orchestrator: OrchestratorSettings,

    /// HTTP server (only used with the `server` feature)
    pub server: ServerSettings,

    /// Advanced/debug settings
    pub advanced: AdvancedSettings,
}

/// Model provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiSettings {
    /// Model used for explain/generate/update/resolve calls
    pub model: String,

    /// Small model used to summarise explanations into search queries
    pub summary_model: String,

    /// Output token limit per call
    pub max_tokens: u32,

    /// Sampling temperature, 0.0 - 1.0
    pub temperature: f32,

    /// Nucleus sampling, 0.0 - 1.0
    pub top_p: f32,

    /// Top-k sampling, 0 - 500
    pub top_k: u32,

    /// Read timeout for a single model call. Template generation is a large
    /// output, so this defaults to several minutes.
    pub request_timeout_secs: u64,

    /// Vertex AI specific settings
    pub vertex_ai: VertexAiSettings,
}

/// Vertex AI (Anthropic on Google Cloud) settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct VertexAiSettings {
    /// Path to service account JSON credentials
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials_path: Option<String>,

    /// Google Cloud project ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    /// Vertex AI region (e.g., "us-east5")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Retry/backoff settings for throttled calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts including the first
    pub max_attempts: u32,

    /// First backoff delay
    pub initial_delay_ms: u64,

    /// Backoff ceiling before jitter
    pub max_delay_ms: u64,

    /// Uniform random jitter added to every delay
    pub max_jitter_ms: u64,
}

/// Reference index settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    /// Remote similarity search endpoint. Takes precedence over `manifest_path`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Bearer token for the remote endpoint (supports $ENV_VAR syntax)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Local manifest of reference pairs for the offline keyword index
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_path: Option<String>,

    /// Number of references retrieved per session
    pub top_k: usize,

    /// "hybrid" | "semantic"
    pub search_mode: String,

    /// Summaries are truncated to this many characters before search
    pub max_query_chars: usize,
}

/// Blob store settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BlobSettings {
    /// Local directory that `s3://bucket/key` and relative locations resolve
    /// against. Defaults to `~/.archform/blobs`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
}

/// Template validator settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ValidationSettings {
    /// Remote validator endpoint. When unset the local structural validator is used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Bearer token for the remote validator (supports $ENV_VAR syntax)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

/// Template Store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// "sqlite" | "memory"
    pub backend: String,

    /// SQLite database path. Defaults to `~/.archform/templates.db`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sqlite_path: Option<String>,

    /// Record time-to-live
    pub ttl_secs: u64,
}

/// Conversation loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Run the best-practices refinement pass after generation
    pub reiterate: bool,

    /// Validations allowed before control returns to the user
    pub max_validations: u32,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Listen port
    pub port: u16,

    /// Maximum concurrent sessions
    pub max_sessions: usize,

    /// Idle sessions older than this are dropped
    pub session_idle_secs: u64,
}

/// Advanced/debug settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedSettings {
    /// Log level: "error" | "warn" | "info" | "debug" | "trace"
    pub log_level: String,
}

// =============================================================================
// Default implementations
// =============================================================================

impl Default for ArchformSettings {
    fn default() -> Self {
        Self {
            version: 1,
            ai: AiSettings::default(),
            retry: RetrySettings::default(),
            retrieval: RetrievalSettings::default(),
            blob: BlobSettings::default(),
            validation: ValidationSettings::default(),
            storage: StorageSettings::default(),
            orchestrator: OrchestratorSettings::default(),
            server: ServerSettings::default(),
            advanced: AdvancedSettings::default(),
        }
    }
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            model: archform_vertex::models::CLAUDE_SONNET_4_5.to_string(),
            summary_model: archform_vertex::models::CLAUDE_HAIKU_4_5.to_string(),
            max_tokens: 8192,
            temperature: 0.0,
            top_p: 1.0,
            top_k: 250,
            request_timeout_secs: 600,
            vertex_ai: VertexAiSettings::default(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 1_000,
            max_delay_ms: 60_000,
            max_jitter_ms: 1_000,
        }
    }
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            manifest_path: None,
            top_k: 3,
            search_mode: "hybrid".to_string(),
            max_query_chars: 1000,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            sqlite_path: None,
            ttl_secs: 900,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            reiterate: true,
            max_validations: 2,
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 8080,
            max_sessions: 10,
            session_idle_secs: 1800,
        }
    }
}

impl Default for AdvancedSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = ArchformSettings::default();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.retry.max_delay_ms, 60_000);
        assert_eq!(settings.retrieval.top_k, 3);
        assert_eq!(settings.retrieval.search_mode, "hybrid");
        assert_eq!(settings.storage.ttl_secs, 900);
        assert_eq!(settings.orchestrator.max_validations, 2);
        assert!(settings.orchestrator.reiterate);
        assert_eq!(settings.ai.top_k, 250);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml = r#"
            version = 1
            [storage]
            backend = "memory"
        "#;

        let settings: ArchformSettings = toml::from_str(toml).unwrap();
        assert_eq!(settings.storage.backend, "memory");
        // Defaults should fill in missing fields
        assert_eq!(settings.storage.ttl_secs, 900);
        assert_eq!(settings.retry.initial_delay_ms, 1_000);
    }

    #[test]
    fn test_serialize_settings() {
        let settings = ArchformSettings::default();
        let toml_str = toml::to_string_pretty(&settings).unwrap();
        assert!(toml_str.contains("version = 1"));
        assert!(toml_str.contains("[retry]"));
        assert!(toml_str.contains("[orchestrator]"));
    }
}
