//! Blob storage for reference templates and diagrams.
//!
//! Locations are URIs as written by ingestion: `s3://bucket/key`,
//! `file:///abs/path`, or a path relative to the store root.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Bytes at `location`, or `None` if nothing is stored there.
    async fn get(&self, location: &str) -> Result<Option<Vec<u8>>>;
}

/// Blobs mirrored onto the local filesystem.
///
/// `s3://bucket/key` resolves to `<root>/bucket/key`.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a location URI to a path under the root.
    pub fn resolve(&self, location: &str) -> Option<PathBuf> {
        if let Some(path) = location.strip_prefix("file://") {
            return Some(PathBuf::from(path));
        }

        let relative = location.strip_prefix("s3://").unwrap_or(location);
        let relative = Path::new(relative.trim_start_matches('/'));

        // Keep lookups inside the root.
        if relative
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return None;
        }
        Some(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, location: &str) -> Result<Option<Vec<u8>>> {
        let Some(path) = self.resolve(location) else {
            tracing::warn!("[blob] rejected location outside root: {}", location);
            return Ok(None);
        };

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read blob {:?}", path)),
        }
    }
}

/// In-memory blobs keyed by exact location.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<String, Vec<u8>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, location: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.blobs.insert(location.into(), bytes.into());
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, location: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.get(location).map(|b| b.value().clone()))
    }
}
