// SPDX-FileCopyrightText: © 2025 pprof-me Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Profile persistence.
//!
//! [`ProfileStore`] is the capability every backend implements. The set of
//! backends is closed: [`MemStore`] keeps everything in process memory, and
//! [`ObjectStore`] writes one object per profile to an [`ObjectBucket`]
//! (S3 in production, [`MemoryBucket`] in tests).

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::Result;

pub mod memory;
pub mod object;
#[cfg(feature = "s3")]
pub mod s3;

pub use memory::MemStore;
pub use object::{MemoryBucket, ObjectBucket, ObjectStore};
#[cfg(feature = "s3")]
pub use s3::{S3Bucket, S3Config};

/// Metadata stored alongside a profile payload.
///
/// `app_name` is fixed when the id is created; later stores merge the
/// remaining fields but never overwrite it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileMetadata {
    pub app_name: String,
    #[serde(default)]
    pub version: String,
    /// Hex-encoded MD5 of the profiled binary, as reported by the client.
    #[serde(default)]
    pub binary_md5: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
}

impl ProfileMetadata {
    /// Folds `update` into `self`, keeping the reserved app name.
    pub(crate) fn merge(&mut self, update: Self) {
        if !update.version.is_empty() {
            self.version = update.version;
        }
        if !update.binary_md5.is_empty() {
            self.binary_md5 = update.binary_md5;
        }
        if update.timestamp.is_some() {
            self.timestamp = update.timestamp;
        }
    }
}

/// One entry of [`ProfileStore::list_profiles`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileInfo {
    pub id: String,
    pub app_name: String,
    pub timestamp: OffsetDateTime,
}

/// Durable mapping from profile id to payload and metadata.
///
/// All operations are safe under concurrent callers. A profile becomes
/// visible to `get_profile` and `list_profiles` only once its payload has
/// been committed by `store_profile`.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Returns a fresh id and reserves its metadata slot with `app_name`.
    async fn create_id(&self, app_name: &str) -> String;

    /// Commits `payload` under `id` and merges `metadata` into the reserved
    /// slot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MalformedId`](crate::StoreError::MalformedId)
    /// when the backend cannot accept `id`, or a backend error.
    async fn store_profile(&self, id: &str, payload: Bytes, metadata: ProfileMetadata)
        -> Result<()>;

    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`](crate::StoreError::NotFound) when no
    /// payload has been committed for `id`.
    async fn get_profile(&self, id: &str) -> Result<(Bytes, ProfileMetadata)>;

    /// # Errors
    ///
    /// Returns a backend error if the listing itself fails.
    async fn list_profiles(&self) -> Result<Vec<ProfileInfo>>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_keeps_app_name() {
        let mut meta = ProfileMetadata { app_name: "svc".into(), ..Default::default() };
        meta.merge(ProfileMetadata {
            app_name: "other".into(),
            version: "1.2.3".into(),
            binary_md5: "abc".into(),
            timestamp: None,
        });
        assert_eq!(meta.app_name, "svc");
        assert_eq!(meta.version, "1.2.3");
        assert_eq!(meta.binary_md5, "abc");
    }

    #[test]
    fn test_merge_ignores_empty_fields() {
        let mut meta = ProfileMetadata {
            app_name: "svc".into(),
            version: "1".into(),
            binary_md5: "abc".into(),
            timestamp: Some(OffsetDateTime::UNIX_EPOCH),
        };
        meta.merge(ProfileMetadata::default());
        assert_eq!(meta.version, "1");
        assert_eq!(meta.binary_md5, "abc");
        assert_eq!(meta.timestamp, Some(OffsetDateTime::UNIX_EPOCH));
    }
}
