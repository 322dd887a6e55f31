//! In-process Template Store.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::{
    record_times, ReferenceMetadata, StoreError, TemplateRevision, TemplateStore, Validity,
};

#[derive(Debug, Default)]
struct SessionRecords {
    /// Counter value; survives expiry of everything else
    latest: u64,
    /// Mirror of the latest revision
    mirror: Option<TemplateRevision>,
    revisions: BTreeMap<u64, TemplateRevision>,
    metadata: Option<MetadataRecord>,
}

#[derive(Debug, Clone)]
struct MetadataRecord {
    documents: Vec<ReferenceMetadata>,
    expires_at: DateTime<Utc>,
}

/// DashMap-backed store. The per-session entry guard makes increment and
/// write a single step.
pub struct MemoryTemplateStore {
    sessions: DashMap<String, SessionRecords>,
    ttl: Duration,
}

impl MemoryTemplateStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
        }
    }
}

fn live(revision: &TemplateRevision) -> Option<TemplateRevision> {
    (!revision.is_expired(Utc::now())).then(|| revision.clone())
}

#[async_trait]
impl TemplateStore for MemoryTemplateStore {
    async fn put_revision(
        &self,
        session_id: &str,
        content: &str,
        validity: Validity,
    ) -> Result<TemplateRevision, StoreError> {
        let (created_at, expires_at) = record_times(self.ttl);

        let mut records = self.sessions.entry(session_id.to_string()).or_default();
        records.latest += 1;
        let revision = TemplateRevision {
            session_id: session_id.to_string(),
            version: records.latest,
            content: content.to_string(),
            validity,
            created_at,
            expires_at,
        };
        records.mirror = Some(revision.clone());
        records.revisions.insert(revision.version, revision.clone());

        tracing::debug!("[store] {} -> v{}", session_id, revision.version);
        Ok(revision)
    }

    async fn get_latest(&self, session_id: &str) -> Result<Option<TemplateRevision>, StoreError> {
        Ok(self
            .sessions
            .get(session_id)
            .and_then(|records| records.mirror.as_ref().and_then(live)))
    }

    async fn get_version(
        &self,
        session_id: &str,
        version: u64,
    ) -> Result<Option<TemplateRevision>, StoreError> {
        Ok(self
            .sessions
            .get(session_id)
            .and_then(|records| records.revisions.get(&version).and_then(live)))
    }

    async fn list_versions(&self, session_id: &str) -> Result<Vec<TemplateRevision>, StoreError> {
        Ok(self
            .sessions
            .get(session_id)
            .map(|records| records.revisions.values().filter_map(live).collect())
            .unwrap_or_default())
    }

    async fn get_reference_metadata(
        &self,
        session_id: &str,
    ) -> Result<Option<Vec<ReferenceMetadata>>, StoreError> {
        let now = Utc::now();
        Ok(self.sessions.get(session_id).and_then(|records| {
            records
                .metadata
                .as_ref()
                .filter(|m| m.expires_at > now)
                .map(|m| m.documents.clone())
        }))
    }

    async fn put_reference_metadata(
        &self,
        session_id: &str,
        documents: &[ReferenceMetadata],
    ) -> Result<Vec<ReferenceMetadata>, StoreError> {
        let (now, expires_at) = record_times(self.ttl);
        let mut records = self.sessions.entry(session_id.to_string()).or_default();

        if let Some(existing) = records.metadata.as_ref().filter(|m| m.expires_at > now) {
            return Ok(existing.documents.clone());
        }

        records.metadata = Some(MetadataRecord {
            documents: documents.to_vec(),
            expires_at,
        });
        Ok(documents.to_vec())
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = Utc::now();
        let mut removed = 0;

        for mut entry in self.sessions.iter_mut() {
            let records = entry.value_mut();
            let before = records.revisions.len();
            records.revisions.retain(|_, r| !r.is_expired(now));
            removed += before - records.revisions.len();

            if records.metadata.as_ref().is_some_and(|m| m.expires_at <= now) {
                records.metadata = None;
                removed += 1;
            }
            if records.mirror.as_ref().is_some_and(|m| m.is_expired(now)) {
                records.mirror = None;
            }
        }

        if removed > 0 {
            tracing::info!("[store] purged {} expired records", removed);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn store() -> MemoryTemplateStore {
        MemoryTemplateStore::new(Duration::from_secs(900))
    }

    fn meta(name: &str) -> ReferenceMetadata {
        ReferenceMetadata {
            reference_template_location: format!("s3://refs/{name}.yaml"),
            reference_image_location: format!("s3://refs/{name}.png"),
        }
    }

    #[tokio::test]
    async fn test_latest_round_trips_every_put() {
        let store = store();

        let first = store.put_generated("s1", "A: 1").await.unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(store.get_latest("s1").await.unwrap().unwrap(), first);

        let second = store.put_validated("s1", "A: 1", false).await.unwrap();
        assert_eq!(second.version, 2);
        assert_eq!(second.validity, Validity::Invalid);
        assert_eq!(store.get_latest("s1").await.unwrap().unwrap(), second);

        assert_eq!(store.get_version("s1", 1).await.unwrap().unwrap(), first);
        assert_eq!(store.list_versions("s1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let store = store();
        store.put_generated("a", "A").await.unwrap();
        let b = store.put_generated("b", "B").await.unwrap();
        assert_eq!(b.version, 1);
        assert!(store.get_latest("missing").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_get_distinct_versions() {
        let store = Arc::new(store());
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

        let latest = store.get_latest("shared").await.unwrap().unwrap();
        assert_eq!(latest.version, 10);
    }

    #[tokio::test]
    async fn test_reference_metadata_first_writer_wins() {
        let store = store();
        assert!(store.get_reference_metadata("s").await.unwrap().is_none());

        let stored = store.put_reference_metadata("s", &[meta("a")]).await.unwrap();
        assert_eq!(stored, vec![meta("a")]);

        let stored = store.put_reference_metadata("s", &[meta("b")]).await.unwrap();
        assert_eq!(stored, vec![meta("a")]);
        assert_eq!(
            store.get_reference_metadata("s").await.unwrap(),
            Some(vec![meta("a")])
        );
    }

    #[tokio::test]
    async fn test_expired_records_hidden_and_purged_without_reusing_versions() {
        let store = MemoryTemplateStore::new(Duration::ZERO);
        store.put_generated("s", "A").await.unwrap();
        store.put_reference_metadata("s", &[meta("a")]).await.unwrap();

        assert!(store.get_latest("s").await.unwrap().is_none());
        assert!(store.get_version("s", 1).await.unwrap().is_none());
        assert!(store.get_reference_metadata("s").await.unwrap().is_none());

        assert_eq!(store.purge_expired().await.unwrap(), 2);
        let next = store.put_generated("s", "B").await.unwrap();
        assert_eq!(next.version, 2);
    }

    proptest! {
        #[test]
        fn prop_versions_are_contiguous_from_one(
            writes in prop::collection::vec(
                (prop::option::of(any::<bool>()), "[a-zA-Z0-9: ]{1,20}"),
                1..30,
            ),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let (versions, latest) = rt.block_on(async {
                let store = store();
                for (verdict, content) in &writes {
                    match verdict {
                        None => store.put_generated("s", content).await.unwrap(),
                        Some(valid) => store.put_validated("s", content, *valid).await.unwrap(),
                    };
                }
                let versions: Vec<u64> = store
                    .list_versions("s")
                    .await
                    .unwrap()
                    .iter()
                    .map(|r| r.version)
                    .collect();
                (versions, store.get_latest("s").await.unwrap().unwrap())
            });

            let expected: Vec<u64> = (1..=writes.len() as u64).collect();
            prop_assert_eq!(versions, expected);
            prop_assert_eq!(latest.version, writes.len() as u64);
            prop_assert_eq!(&latest.content, &writes[writes.len() - 1].1);
        }
    }
}
