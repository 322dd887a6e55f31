//! SQLite Template Store.
//!
//! One table mirrors the record layout: `(session_id, version)` keys with
//! `v0` as counter+mirror, `v<N>` as revisions and `METADATA` as the
//! retrieval cache. A single connection sits behind a mutex and is only used
//! from the blocking pool. Every write runs in one transaction, so the
//! counter bump and the numbered insert commit together or not at all.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{
    record_times, version_slot, ReferenceMetadata, StoreError, TemplateRevision, TemplateStore,
    Validity, COUNTER_SLOT, METADATA_SLOT,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS template_records (
    session_id  TEXT NOT NULL,
    version     TEXT NOT NULL,
    latest      INTEGER,
    content     TEXT,
    is_valid    INTEGER,
    documents   TEXT,
    created_at  INTEGER NOT NULL,
    expires_at  INTEGER NOT NULL,
    PRIMARY KEY (session_id, version)
);
CREATE INDEX IF NOT EXISTS idx_template_records_expiry ON template_records (expires_at);
";

pub struct SqliteTemplateStore {
    conn: Arc<Mutex<Connection>>,
    ttl: Duration,
}

fn read_err(e: rusqlite::Error) -> StoreError {
    StoreError::ReadFailed(e.to_string())
}

fn write_err(e: rusqlite::Error) -> StoreError {
    tracing::error!("[store] sqlite write failed: {}", e);
    StoreError::WriteFailed(e.to_string())
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

impl SqliteTemplateStore {
    /// Open (creating if needed) a database file.
    pub fn open(path: &Path, ttl: Duration) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        }
        let conn = Connection::open(path).map_err(write_err)?;
        Self::init(conn, ttl)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory(ttl: Duration) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(write_err)?;
        Self::init(conn, ttl)
    }

    fn init(conn: Connection, ttl: Duration) -> Result<Self, StoreError> {
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )
        .map_err(write_err)?;
        conn.execute_batch(SCHEMA).map_err(write_err)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            ttl,
        })
    }

    /// Run a closure against the connection on the blocking pool.
    async fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::WriteFailed("sqlite connection lock poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::WriteFailed(format!("join error: {}", e)))?
    }
}

fn revision_from_row(session_id: &str, version: u64, row: &Row<'_>) -> rusqlite::Result<TemplateRevision> {
    Ok(TemplateRevision {
        session_id: session_id.to_string(),
        version,
        content: row.get::<_, Option<String>>("content")?.unwrap_or_default(),
        validity: Validity::from_db(row.get("is_valid")?),
        created_at: millis_to_datetime(row.get("created_at")?),
        expires_at: millis_to_datetime(row.get("expires_at")?),
    })
}

fn parse_slot(slot: &str) -> Option<u64> {
    slot.strip_prefix('v')?.parse().ok().filter(|v| *v > 0)
}

#[async_trait]
impl TemplateStore for SqliteTemplateStore {
    async fn put_revision(
        &self,
        session_id: &str,
        content: &str,
        validity: Validity,
    ) -> Result<TemplateRevision, StoreError> {
        let (created_at, expires_at) = record_times(self.ttl);
        let created_ms = created_at.timestamp_millis();
        let expires_ms = expires_at.timestamp_millis();
        let is_valid = validity.to_db();
        let session = session_id.to_string();
        let body = content.to_string();

        let version = self
            .with_conn(move |conn| {
                let tx = conn.transaction().map_err(write_err)?;

                let latest: i64 = tx
                    .query_row(
                        "INSERT INTO template_records
                            (session_id, version, latest, content, is_valid, created_at, expires_at)
                         VALUES (?1, ?2, 1, ?3, ?4, ?5, ?6)
                         ON CONFLICT (session_id, version) DO UPDATE SET
                            latest = COALESCE(latest, 0) + 1,
                            content = excluded.content,
                            is_valid = excluded.is_valid,
                            created_at = excluded.created_at,
                            expires_at = excluded.expires_at
                         RETURNING latest",
                        params![session, COUNTER_SLOT, body, is_valid, created_ms, expires_ms],
                        |row| row.get(0),
                    )
                    .map_err(write_err)?;

                let version = latest as u64;
                tx.execute(
                    "INSERT INTO template_records
                        (session_id, version, content, is_valid, created_at, expires_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![session, version_slot(version), body, is_valid, created_ms, expires_ms],
                )
                .map_err(write_err)?;

                tx.commit().map_err(write_err)?;
                Ok(version)
            })
            .await?;

        tracing::debug!("[store] {} -> v{}", session_id, version);
        Ok(TemplateRevision {
            session_id: session_id.to_string(),
            version,
            content: content.to_string(),
            validity,
            created_at,
            expires_at,
        })
    }

    async fn get_latest(&self, session_id: &str) -> Result<Option<TemplateRevision>, StoreError> {
        let session = session_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT latest, content, is_valid, created_at, expires_at
                 FROM template_records
                 WHERE session_id = ?1 AND version = ?2 AND expires_at > ?3",
                params![session, COUNTER_SLOT, now_millis()],
                |row| {
                    let latest: i64 = row.get("latest")?;
                    revision_from_row(&session, latest as u64, row)
                },
            )
            .optional()
            .map_err(read_err)
        })
        .await
    }

    async fn get_version(
        &self,
        session_id: &str,
        version: u64,
    ) -> Result<Option<TemplateRevision>, StoreError> {
        if version == 0 {
            return Ok(None);
        }
        let session = session_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT content, is_valid, created_at, expires_at
                 FROM template_records
                 WHERE session_id = ?1 AND version = ?2 AND expires_at > ?3",
                params![session, version_slot(version), now_millis()],
                |row| revision_from_row(&session, version, row),
            )
            .optional()
            .map_err(read_err)
        })
        .await
    }

    async fn list_versions(&self, session_id: &str) -> Result<Vec<TemplateRevision>, StoreError> {
        let session = session_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT version, content, is_valid, created_at, expires_at
                     FROM template_records
                     WHERE session_id = ?1 AND version GLOB 'v[0-9]*' AND version != ?2
                       AND expires_at > ?3",
                )
                .map_err(read_err)?;

            let rows = stmt
                .query_map(params![session, COUNTER_SLOT, now_millis()], |row| {
                    let slot: String = row.get("version")?;
                    match parse_slot(&slot) {
                        Some(version) => revision_from_row(&session, version, row).map(Some),
                        None => Ok(None),
                    }
                })
                .map_err(read_err)?;

            let mut revisions = rows
                .filter_map(|r| r.transpose())
                .collect::<Result<Vec<_>, _>>()
                .map_err(read_err)?;
            revisions.sort_by_key(|r| r.version);
            Ok(revisions)
        })
        .await
    }

    async fn get_reference_metadata(
        &self,
        session_id: &str,
    ) -> Result<Option<Vec<ReferenceMetadata>>, StoreError> {
        let session = session_id.to_string();
        let documents: Option<String> = self
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT documents FROM template_records
                     WHERE session_id = ?1 AND version = ?2 AND expires_at > ?3",
                    params![session, METADATA_SLOT, now_millis()],
                    |row| row.get::<_, Option<String>>(0),
                )
                .optional()
                .map_err(read_err)
            })
            .await?
            .flatten();

        documents
            .map(|json| {
                serde_json::from_str(&json).map_err(|e| StoreError::ReadFailed(e.to_string()))
            })
            .transpose()
    }

    async fn put_reference_metadata(
        &self,
        session_id: &str,
        documents: &[ReferenceMetadata],
    ) -> Result<Vec<ReferenceMetadata>, StoreError> {
        let (created_at, expires_at) = record_times(self.ttl);
        let json =
            serde_json::to_string(documents).map_err(|e| StoreError::WriteFailed(e.to_string()))?;

        let session = session_id.to_string();
        let stored: String = self
            .with_conn(move |conn| {
                let tx = conn.transaction().map_err(write_err)?;
                // An expired row is replaced; a live one is kept.
                tx.execute(
                    "INSERT INTO template_records
                        (session_id, version, documents, created_at, expires_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT (session_id, version) DO UPDATE SET
                        documents = excluded.documents,
                        created_at = excluded.created_at,
                        expires_at = excluded.expires_at
                     WHERE template_records.expires_at <= excluded.created_at",
                    params![
                        session,
                        METADATA_SLOT,
                        json,
                        created_at.timestamp_millis(),
                        expires_at.timestamp_millis()
                    ],
                )
                .map_err(write_err)?;

                let stored: String = tx
                    .query_row(
                        "SELECT documents FROM template_records WHERE session_id = ?1 AND version = ?2",
                        params![session, METADATA_SLOT],
                        |row| row.get(0),
                    )
                    .map_err(write_err)?;
                tx.commit().map_err(write_err)?;
                Ok(stored)
            })
            .await?;

        serde_json::from_str(&stored).map_err(|e| StoreError::ReadFailed(e.to_string()))
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let removed = self
            .with_conn(|conn| {
                let tx = conn.transaction().map_err(write_err)?;
                let now = now_millis();
                let removed = tx
                    .execute(
                        "DELETE FROM template_records WHERE version != ?1 AND expires_at <= ?2",
                        params![COUNTER_SLOT, now],
                    )
                    .map_err(write_err)?;
                // Counter rows keep their number; only the mirrored content goes.
                tx.execute(
                    "UPDATE template_records SET content = NULL, is_valid = NULL
                     WHERE version = ?1 AND expires_at <= ?2 AND content IS NOT NULL",
                    params![COUNTER_SLOT, now],
                )
                .map_err(write_err)?;
                tx.commit().map_err(write_err)?;
                Ok(removed)
            })
            .await?;

        if removed > 0 {
            tracing::info!("[store] purged {} expired records", removed);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn meta(name: &str) -> ReferenceMetadata {
        ReferenceMetadata {
            reference_template_location: format!("s3://refs/{name}.yaml"),
            reference_image_location: format!("s3://refs/{name}.png"),
        }
    }

    #[tokio::test]
    async fn test_put_and_read_back() {
        let store = SqliteTemplateStore::open_in_memory(Duration::from_secs(900)).unwrap();

        let first = store.put_generated("s1", "Resources: {}").await.unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(first.validity, Validity::Unknown);
        assert_eq!(store.get_latest("s1").await.unwrap().unwrap(), first);

        let second = store.put_validated("s1", "Resources: {}", true).await.unwrap();
        assert_eq!(second.version, 2);
        assert_eq!(store.get_latest("s1").await.unwrap().unwrap(), second);
        assert_eq!(store.get_version("s1", 1).await.unwrap().unwrap(), first);
        assert!(store.get_version("s1", 0).await.unwrap().is_none());

        let versions: Vec<u64> = store
            .list_versions("s1")
            .await
            .unwrap()
            .iter()
            .map(|r| r.version)
            .collect();
        assert_eq!(versions, vec![1, 2]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_get_distinct_versions() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            SqliteTemplateStore::open(&dir.path().join("templates.db"), Duration::from_secs(900))
                .unwrap(),
        );

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store.put_generated("shared", &format!("T{i}")).await.unwrap().version
                })
            })
            .collect();

        let mut versions = Vec::new();
        for handle in handles {
            versions.push(handle.await.unwrap());
        }
        versions.sort_unstable();
        assert_eq!(versions, (1..=10).collect::<Vec<u64>>());
        assert_eq!(store.list_versions("shared").await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_busy_connection_does_not_stall_the_runtime() {
        let store = Arc::new(SqliteTemplateStore::open_in_memory(Duration::from_secs(900)).unwrap());

        let guard = store.conn.lock().unwrap();
        let writer = {
            let store = store.clone();
            tokio::spawn(async move { store.put_generated("s", "A").await.unwrap().version })
        };

        // The single runtime thread keeps serving timers while the write waits.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!writer.is_finished());

        drop(guard);
        assert_eq!(writer.await.unwrap(), 1);
        assert_eq!(store.get_latest("s").await.unwrap().unwrap().content, "A");
    }

    #[tokio::test]
    async fn test_history_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("templates.db");
        {
            let store = SqliteTemplateStore::open(&path, Duration::from_secs(900)).unwrap();
            store.put_generated("s", "A").await.unwrap();
        }
        let store = SqliteTemplateStore::open(&path, Duration::from_secs(900)).unwrap();
        let next = store.put_generated("s", "B").await.unwrap();
        assert_eq!(next.version, 2);
        assert_eq!(store.get_version("s", 1).await.unwrap().unwrap().content, "A");
    }

    #[tokio::test]
    async fn test_reference_metadata_first_writer_wins() {
        let store = SqliteTemplateStore::open_in_memory(Duration::from_secs(900)).unwrap();

        let stored = store.put_reference_metadata("s", &[meta("a"), meta("b")]).await.unwrap();
        assert_eq!(stored.len(), 2);

        let stored = store.put_reference_metadata("s", &[meta("c")]).await.unwrap();
        assert_eq!(stored, vec![meta("a"), meta("b")]);
        assert_eq!(
            store.get_reference_metadata("s").await.unwrap(),
            Some(vec![meta("a"), meta("b")])
        );
        // Metadata is not a revision
        assert!(store.list_versions("s").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expired_records_purged_and_counter_kept() {
        let store = SqliteTemplateStore::open_in_memory(Duration::ZERO).unwrap();
        store.put_generated("s", "A").await.unwrap();
        store.put_reference_metadata("s", &[meta("a")]).await.unwrap();

        assert!(store.get_latest("s").await.unwrap().is_none());
        assert!(store.get_reference_metadata("s").await.unwrap().is_none());

        assert_eq!(store.purge_expired().await.unwrap(), 2);
        assert_eq!(store.put_generated("s", "B").await.unwrap().version, 2);
    }
}
