// SPDX-FileCopyrightText: © 2025 pprof-me Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! In-process profile store. Ids are bare v1 uuids.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::debug;

use super::{ProfileInfo, ProfileMetadata, ProfileStore};
use crate::error::{Result, StoreError};
use crate::id::{uuid_timestamp, IdGenerator};

#[derive(Debug, Default)]
struct Inner {
    payloads: HashMap<String, Bytes>,
    metadata: HashMap<String, ProfileMetadata>,
}

/// Profile store backed by two maps under one reader-writer lock.
///
/// Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemStore {
    inner: RwLock<Inner>,
    ids: IdGenerator,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileStore for MemStore {
    async fn create_id(&self, app_name: &str) -> String {
        let uuid = self.ids.next_uuid();
        let id = uuid.to_string();
        let metadata = ProfileMetadata {
            app_name: app_name.to_string(),
            timestamp: uuid_timestamp(&uuid),
            ..Default::default()
        };
        self.inner.write().await.metadata.insert(id.clone(), metadata);
        id
    }

    async fn store_profile(
        &self,
        id: &str,
        payload: Bytes,
        metadata: ProfileMetadata,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let size = payload.len();
        // Ids that were never reserved get a slot with an empty app name.
        let slot = inner.metadata.entry(id.to_string()).or_default();
        slot.merge(metadata);
        if slot.timestamp.is_none() {
            slot.timestamp = Some(OffsetDateTime::now_utc());
        }
        inner.payloads.insert(id.to_string(), payload);
        debug!(profile_id = %id, size, "Stored profile in memory");
        Ok(())
    }

    async fn get_profile(&self, id: &str) -> Result<(Bytes, ProfileMetadata)> {
        let inner = self.inner.read().await;
        let payload =
            inner.payloads.get(id).cloned().ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let metadata = inner.metadata.get(id).cloned().unwrap_or_default();
        Ok((payload, metadata))
    }

    async fn list_profiles(&self) -> Result<Vec<ProfileInfo>> {
        let inner = self.inner.read().await;
        Ok(inner
            .payloads
            .keys()
            .map(|id| {
                let meta = inner.metadata.get(id);
                ProfileInfo {
                    id: id.clone(),
                    app_name: meta.map(|m| m.app_name.clone()).unwrap_or_default(),
                    timestamp: meta
                        .and_then(|m| m.timestamp)
                        .unwrap_or(OffsetDateTime::UNIX_EPOCH),
                }
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_create_id_returns_distinct_ids() {
        let store = MemStore::new();
        let a = store.create_id("svc").await;
        let b = store.create_id("svc").await;
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_list_returns_only_committed_profiles() {
        let store = MemStore::new();
        let a = store.create_id("svc").await;
        let b = store.create_id("svc").await;
        let _pending = store.create_id("svc").await;

        store
            .store_profile(&a, Bytes::from_static(b"one"), ProfileMetadata::default())
            .await
            .unwrap();
        store
            .store_profile(&b, Bytes::from_static(b"two"), ProfileMetadata::default())
            .await
            .unwrap();

        let mut ids: Vec<String> =
            store.list_profiles().await.unwrap().into_iter().map(|p| p.id).collect();
        ids.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_store_preserves_reserved_app_name() {
        let store = MemStore::new();
        let id = store.create_id("svc").await;
        let meta = ProfileMetadata {
            app_name: "impostor".into(),
            version: "v2".into(),
            ..Default::default()
        };
        store.store_profile(&id, Bytes::from_static(b"hellothere"), meta).await.unwrap();

        let (payload, meta) = store.get_profile(&id).await.unwrap();
        assert_eq!(&payload[..], b"hellothere");
        assert_eq!(meta.app_name, "svc");
        assert_eq!(meta.version, "v2");
        assert!(meta.timestamp.is_some());

        let listed = store.list_profiles().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].app_name, "svc");
    }

    #[tokio::test]
    async fn test_get_unknown_is_not_found() {
        let store = MemStore::new();
        let err = store.get_profile("unknown").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(id) if id == "unknown"));
    }

    #[tokio::test]
    async fn test_reserved_but_uncommitted_is_not_found() {
        let store = MemStore::new();
        let id = store.create_id("svc").await;
        assert!(matches!(store.get_profile(&id).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_concurrent_stores_keep_app_names() {
        let store = Arc::new(MemStore::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let app = format!("app-{i}");
                let id = store.create_id(&app).await;
                let payload = Bytes::from(format!("payload-{i}"));
                store
                    .store_profile(&id, payload.clone(), ProfileMetadata::default())
                    .await
                    .unwrap();
                let (got, meta) = store.get_profile(&id).await.unwrap();
                assert_eq!(got, payload);
                assert_eq!(meta.app_name, app);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.list_profiles().await.unwrap().len(), 16);
    }
}
