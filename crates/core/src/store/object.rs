// SPDX-FileCopyrightText: © 2025 pprof-me Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Object-storage profile store.
//!
//! Each profile is a single object whose key is the profile id (see
//! [`crate::id`]). Nothing is kept besides the payload: metadata on read is
//! derived from the key.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{ProfileInfo, ProfileMetadata, ProfileStore};
use crate::error::{Result, StoreError};
use crate::id::{self, IdGenerator};

/// Minimal key/value surface of an object-storage bucket.
#[async_trait]
pub trait ObjectBucket: Send + Sync {
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on transport failure.
    async fn put(&self, key: &str, body: Bytes) -> Result<()>;

    /// Returns `None` when the key does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on transport failure.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// All keys in ascending lexicographic order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on transport failure.
    async fn list_keys(&self) -> Result<Vec<String>>;
}

/// Bucket held in process memory, ordered like an S3 listing.
#[derive(Debug, Default)]
pub struct MemoryBucket {
    objects: RwLock<BTreeMap<String, Bytes>>,
}

impl MemoryBucket {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectBucket for MemoryBucket {
    async fn put(&self, key: &str, body: Bytes) -> Result<()> {
        self.objects.write().await.insert(key.to_string(), body);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.objects.read().await.get(key).cloned())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        Ok(self.objects.read().await.keys().cloned().collect())
    }
}

/// Profile store writing one object per profile to `B`.
#[derive(Debug)]
pub struct ObjectStore<B> {
    bucket: B,
    ids: IdGenerator,
}

impl<B: ObjectBucket> ObjectStore<B> {
    pub fn new(bucket: B) -> Self {
        Self { bucket, ids: IdGenerator::new() }
    }

    pub const fn bucket(&self) -> &B {
        &self.bucket
    }
}

#[async_trait]
impl<B: ObjectBucket> ProfileStore for ObjectStore<B> {
    async fn create_id(&self, app_name: &str) -> String {
        id::new_object_id(&self.ids, app_name)
    }

    async fn store_profile(
        &self,
        id: &str,
        payload: Bytes,
        _metadata: ProfileMetadata,
    ) -> Result<()> {
        id::parse_id(id)?;
        let size = payload.len();
        self.bucket.put(id, payload).await?;
        debug!(profile_id = %id, size, "Stored profile object");
        Ok(())
    }

    async fn get_profile(&self, id: &str) -> Result<(Bytes, ProfileMetadata)> {
        let parsed = id::parse_id(id)?;
        let payload =
            self.bucket.get(id).await?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let timestamp = parsed.timestamp();
        let metadata = ProfileMetadata {
            app_name: parsed.app_name,
            timestamp: Some(timestamp),
            ..Default::default()
        };
        Ok((payload, metadata))
    }

    async fn list_profiles(&self) -> Result<Vec<ProfileInfo>> {
        let keys = self.bucket.list_keys().await?;
        let mut profiles: Vec<ProfileInfo> = keys
            .into_iter()
            .filter_map(|key| match id::parse_id(&key) {
                Ok(parsed) => Some(ProfileInfo {
                    timestamp: parsed.timestamp(),
                    app_name: parsed.app_name,
                    id: key,
                }),
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping object with unparseable key");
                    None
                },
            })
            .collect();
        // Keys already arrive newest first; the sort only settles profiles
        // created within the same second.
        profiles.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(profiles)
    }

    fn name(&self) -> &'static str {
        "object"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::format_id;

    fn store() -> ObjectStore<MemoryBucket> {
        ObjectStore::new(MemoryBucket::new())
    }

    #[tokio::test]
    async fn test_store_and_get_derives_metadata_from_key() {
        let store = store();
        let id = store.create_id("svc").await;
        store
            .store_profile(&id, Bytes::from_static(b"hellothere"), ProfileMetadata::default())
            .await
            .unwrap();

        let (payload, meta) = store.get_profile(&id).await.unwrap();
        assert_eq!(&payload[..], b"hellothere");
        assert_eq!(meta.app_name, "svc");
        assert!(meta.timestamp.is_some());
    }

    #[tokio::test]
    async fn test_store_rejects_malformed_id() {
        let store = store();
        let err = store
            .store_profile("not-an-id", Bytes::from_static(b"x"), ProfileMetadata::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MalformedId(_)));
        assert!(store.bucket().list_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = store();
        let id = store.create_id("svc").await;
        assert!(matches!(store.get_profile(&id).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_is_newest_first() {
        let store = store();
        let ids = IdGenerator::new();
        // Same uuid clock, but prefixes claim different seconds so the
        // bucket order differs from creation order.
        let mut expected = Vec::new();
        for _ in 0..5 {
            let uuid = ids.next_uuid();
            let secs = uuid.get_timestamp().unwrap().to_unix().0;
            let id = format_id(secs, "svc", &uuid);
            store.bucket().put(&id, Bytes::from_static(b"p")).await.unwrap();
            expected.push(id);
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        expected.reverse();

        let listed = store.list_profiles().await.unwrap();
        let listed_ids: Vec<_> = listed.iter().map(|p| p.id.clone()).collect();
        assert_eq!(listed_ids, expected);
        assert!(listed.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
    }

    #[tokio::test]
    async fn test_list_skips_unparseable_keys() {
        let store = store();
        let id = store.create_id("svc").await;
        store
            .store_profile(&id, Bytes::from_static(b"p"), ProfileMetadata::default())
            .await
            .unwrap();
        store.bucket().put("README", Bytes::from_static(b"junk")).await.unwrap();
        store.bucket().put("1:2:3", Bytes::from_static(b"junk")).await.unwrap();

        let listed = store.list_profiles().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);
        assert_eq!(listed[0].app_name, "svc");
    }
}
