//! Versioned template storage.
//!
//! Records are keyed by `(session_id, slot)`. Slot `v0` is the counter: it
//! holds the latest version number and mirrors the latest revision, so reads
//! of "latest" never need a max-version scan. Slot `v<N>` holds revision N.
//! Slot `METADATA` holds the session's retrieved reference locations.
//!
//! Incrementing the counter and writing the numbered record happen as one
//! step per backend, so concurrent writers to one session serialize and
//! every version number is used exactly once.

pub mod memory;
pub mod sqlite;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ArchformError;

pub use memory::MemoryTemplateStore;
pub use sqlite::SqliteTemplateStore;

/// Reserved slot for the counter and latest mirror.
pub const COUNTER_SLOT: &str = "v0";
/// Reserved slot for the retrieval cache.
pub const METADATA_SLOT: &str = "METADATA";

/// Validation verdict attached to a revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Validity {
    Valid,
    Invalid,
    Unknown,
}

impl Validity {
    pub fn from_bool(is_valid: bool) -> Self {
        if is_valid {
            Validity::Valid
        } else {
            Validity::Invalid
        }
    }

    pub(crate) fn to_db(self) -> Option<bool> {
        match self {
            Validity::Valid => Some(true),
            Validity::Invalid => Some(false),
            Validity::Unknown => None,
        }
    }

    pub(crate) fn from_db(value: Option<bool>) -> Self {
        value.map(Validity::from_bool).unwrap_or(Validity::Unknown)
    }
}

/// One immutable template revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateRevision {
    pub session_id: String,
    pub version: u64,
    pub content: String,
    pub validity: Validity,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl TemplateRevision {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Where a retrieved reference's template and diagram live.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceMetadata {
    pub reference_template_location: String,
    pub reference_image_location: String,
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("{0}")]
    WriteFailed(String),

    #[error("storage read failed: {0}")]
    ReadFailed(String),
}

impl From<StoreError> for ArchformError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::WriteFailed(msg) => ArchformError::StorageWriteFailed(msg),
            StoreError::ReadFailed(msg) => ArchformError::Internal(msg),
        }
    }
}

#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// Allocate the next version for `session_id` and store `content` under it.
    async fn put_revision(
        &self,
        session_id: &str,
        content: &str,
        validity: Validity,
    ) -> Result<TemplateRevision, StoreError>;

    /// Latest live revision, read from the counter mirror.
    async fn get_latest(&self, session_id: &str) -> Result<Option<TemplateRevision>, StoreError>;

    async fn get_version(
        &self,
        session_id: &str,
        version: u64,
    ) -> Result<Option<TemplateRevision>, StoreError>;

    /// All live numbered revisions, oldest first.
    async fn list_versions(&self, session_id: &str) -> Result<Vec<TemplateRevision>, StoreError>;

    async fn get_reference_metadata(
        &self,
        session_id: &str,
    ) -> Result<Option<Vec<ReferenceMetadata>>, StoreError>;

    /// Store the reference set unless a live one exists. Returns whichever set
    /// is stored afterwards, so the first writer wins.
    async fn put_reference_metadata(
        &self,
        session_id: &str,
        documents: &[ReferenceMetadata],
    ) -> Result<Vec<ReferenceMetadata>, StoreError>;

    /// Delete expired numbered revisions and reference sets. Counter records
    /// keep their number so versions are never reused. Returns records removed.
    async fn purge_expired(&self) -> Result<usize, StoreError>;

    /// New version with unknown validity.
    async fn put_generated(
        &self,
        session_id: &str,
        content: &str,
    ) -> Result<TemplateRevision, StoreError> {
        self.put_revision(session_id, content, Validity::Unknown).await
    }

    /// New version carrying a validation verdict.
    async fn put_validated(
        &self,
        session_id: &str,
        content: &str,
        is_valid: bool,
    ) -> Result<TemplateRevision, StoreError> {
        self.put_revision(session_id, content, Validity::from_bool(is_valid))
            .await
    }
}

/// Timestamps for a record written now, at the millisecond precision the
/// SQLite backend stores.
pub(crate) fn record_times(ttl: Duration) -> (DateTime<Utc>, DateTime<Utc>) {
    let now = Utc::now();
    let now = DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now);
    let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
    let expires = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
    (now, expires)
}

pub(crate) fn version_slot(version: u64) -> String {
    format!("v{}", version)
}
