//! CLI bootstrap - wire settings into a ready orchestrator.
//!
//! The same wiring serves the interactive CLI and the HTTP server.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::llm::{InferenceParams, ModelClient, RetryPolicy, VertexModelClient};
use crate::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::retrieval::{
    BlobStore, FsBlobStore, HttpReferenceIndex, KeywordReferenceIndex, ReferenceIndex,
    RetrievalConfig, RetrievalGateway,
};
use crate::settings::{
    archform_dir, expand_home, get_with_env_fallback, ArchformSettings, SettingsManager,
};
use crate::store::{MemoryTemplateStore, SqliteTemplateStore, TemplateStore};
use crate::validation::{
    HttpTemplateValidator, StructuralValidator, TemplateValidator, ValidationGateway,
};

use super::args::Args;

/// Everything a CLI or server run needs.
pub struct CliContext {
    pub orchestrator: Arc<Orchestrator>,

    /// Settings as loaded, with command-line overrides applied
    pub settings: ArchformSettings,

    pub settings_manager: Arc<SettingsManager>,

    pub args: Args,
}

/// Load settings, start logging and build the orchestrator.
pub async fn initialize(args: &Args) -> Result<CliContext> {
    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        // Only warn on errors other than file not found
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Failed to load .env file: {}", e);
        }
    }

    let settings_manager = Arc::new(match &args.settings {
        Some(path) => SettingsManager::with_path(path.clone())
            .await
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => SettingsManager::new()
            .await
            .context("Failed to initialize settings manager")?,
    });

    let mut settings = settings_manager.get().await;
    if let Some(model) = &args.model {
        settings.ai.model = model.clone();
    }

    init_logging(if args.verbose {
        "debug"
    } else {
        settings.advanced.log_level.as_str()
    });

    // Ensure settings file exists (creates template on first run)
    match settings_manager.ensure_settings_file().await {
        Ok(true) => tracing::info!(
            "Created settings template at {}",
            settings_manager.path().display()
        ),
        Ok(false) => {}
        Err(e) => tracing::warn!("Failed to create settings template: {}", e),
    }

    if args.verbose {
        eprintln!(
            "[cli] Settings loaded from {}",
            settings_manager.path().display()
        );
        eprintln!("[cli] Model: {}", settings.ai.model);
        eprintln!("[cli] Storage backend: {}", settings.storage.backend);
    }

    let orchestrator = build_orchestrator(&settings).await?;

    Ok(CliContext {
        orchestrator: Arc::new(orchestrator),
        settings,
        settings_manager,
        args: args.clone(),
    })
}

fn init_logging(level: &str) {
    let directive: tracing_subscriber::filter::Directive = format!("archform={}", level)
        .parse()
        .unwrap_or_else(|_| tracing_subscriber::filter::LevelFilter::INFO.into());
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive))
        .try_init();
}

/// Build the orchestrator and its collaborators from settings.
pub async fn build_orchestrator(settings: &ArchformSettings) -> Result<Orchestrator> {
    let store = build_store(settings)?;

    let blob_root = settings
        .blob
        .root
        .as_deref()
        .map(expand_home)
        .unwrap_or_else(|| archform_dir().join("references"));
    let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(blob_root));

    let index = build_index(settings, blobs.as_ref()).await?;
    let validator = build_validator(settings)?;
    let model = build_model(settings).await?;
    let retry = RetryPolicy::from(&settings.retry);

    let retrieval_config = RetrievalConfig {
        top_k: settings.retrieval.top_k,
        search_mode: settings
            .retrieval
            .search_mode
            .parse()
            .context("Invalid retrieval.search_mode")?,
        max_query_chars: settings.retrieval.max_query_chars,
        summary_model: settings.ai.summary_model.clone(),
        summary_params: InferenceParams {
            max_tokens: 1024,
            ..InferenceParams::from(&settings.ai)
        },
    };

    let retrieval = RetrievalGateway::new(
        index,
        blobs,
        store.clone(),
        model.clone(),
        retry.clone(),
        retrieval_config,
    );

    Ok(Orchestrator::new(
        model,
        retrieval,
        store,
        ValidationGateway::new(validator),
        retry,
        OrchestratorConfig::from(settings),
    ))
}

fn build_store(settings: &ArchformSettings) -> Result<Arc<dyn TemplateStore>> {
    let ttl = Duration::from_secs(settings.storage.ttl_secs);

    match settings.storage.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryTemplateStore::new(ttl))),
        "sqlite" => {
            let path = settings
                .storage
                .sqlite_path
                .as_deref()
                .map(expand_home)
                .unwrap_or_else(|| archform_dir().join("templates.db"));
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create storage directory {}", parent.display())
                })?;
            }
            let store = SqliteTemplateStore::open(&path, ttl)
                .with_context(|| format!("Failed to open template store {}", path.display()))?;
            tracing::info!("Template store at {}", path.display());
            Ok(Arc::new(store))
        }
        other => anyhow::bail!(
            "Unknown storage.backend '{}': expected \"sqlite\" or \"memory\"",
            other
        ),
    }
}

async fn build_index(
    settings: &ArchformSettings,
    blobs: &dyn BlobStore,
) -> Result<Arc<dyn ReferenceIndex>> {
    let retrieval = &settings.retrieval;

    if let Some(endpoint) = retrieval.endpoint.as_deref().filter(|e| !e.is_empty()) {
        let api_key =
            get_with_env_fallback(&retrieval.api_key, &["ARCHFORM_RETRIEVAL_API_KEY"], None);
        tracing::info!("Reference index: {}", endpoint);
        return Ok(Arc::new(HttpReferenceIndex::new(endpoint, api_key)?));
    }

    let manifest = retrieval
        .manifest_path
        .as_deref()
        .map(expand_home)
        .unwrap_or_else(|| archform_dir().join("references").join("manifest.json"));
    let index = KeywordReferenceIndex::load(&manifest, blobs)
        .await
        .with_context(|| {
            format!(
                "No retrieval.endpoint configured and failed to load reference manifest {}",
                manifest.display()
            )
        })?;
    if index.is_empty() {
        tracing::warn!("Reference manifest {} has no usable references", manifest.display());
    }
    Ok(Arc::new(index))
}

fn build_validator(settings: &ArchformSettings) -> Result<Arc<dyn TemplateValidator>> {
    let validation = &settings.validation;

    match validation.endpoint.as_deref().filter(|e| !e.is_empty()) {
        Some(endpoint) => {
            let api_key =
                get_with_env_fallback(&validation.api_key, &["ARCHFORM_VALIDATION_API_KEY"], None);
            tracing::info!("Template validator: {}", endpoint);
            Ok(Arc::new(HttpTemplateValidator::new(endpoint, api_key)?))
        }
        None => {
            tracing::info!("Template validator: local structural check");
            Ok(Arc::new(StructuralValidator))
        }
    }
}

async fn build_model(settings: &ArchformSettings) -> Result<Arc<dyn ModelClient>> {
    let vertex = &settings.ai.vertex_ai;

    let project_id = get_with_env_fallback(
        &vertex.project_id,
        &["VERTEX_AI_PROJECT_ID", "GOOGLE_CLOUD_PROJECT"],
        None,
    )
    .ok_or_else(|| {
        anyhow::anyhow!("Vertex AI requires 'ai.vertex_ai.project_id' in settings.toml")
    })?;
    let location = get_with_env_fallback(&vertex.location, &["VERTEX_AI_LOCATION"], None)
        .unwrap_or_else(|| "us-east5".to_string());
    let credentials = get_with_env_fallback(
        &vertex.credentials_path,
        &["GOOGLE_APPLICATION_CREDENTIALS"],
        None,
    )
    .map(|path| expand_home(&path));

    let client = VertexModelClient::connect(
        credentials.as_deref().map(Path::new),
        &project_id,
        &location,
        Duration::from_secs(settings.ai.request_timeout_secs),
    )
    .await?;
    Ok(Arc::new(client))
}
