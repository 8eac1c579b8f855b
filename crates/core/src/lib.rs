// SPDX-FileCopyrightText: © 2025 pprof-me Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! pprof-me Core - profile storage for the pprof-me server.
//!
//! ## Modules
//!
//! - [`id`]: Profile id generation and the sortable object-key format
//! - [`store`]: The [`ProfileStore`] capability and its backends
//! - [`error`]: Error types
//!
//! ## Quick Start
//!
//! ```ignore
//! use pprof_me_core::{MemStore, ProfileMetadata, ProfileStore};
//!
//! let store = MemStore::new();
//! let id = store.create_id("my-service").await;
//! store.store_profile(&id, payload, ProfileMetadata::default()).await?;
//! let (payload, meta) = store.get_profile(&id).await?;
//! ```

pub use async_trait::async_trait;

pub mod error;
pub mod id;
pub mod store;

pub use error::StoreError;
pub use id::{invert_digits, parse_id, IdError, IdGenerator, ParsedId};
pub use store::{
    MemStore, MemoryBucket, ObjectBucket, ObjectStore, ProfileInfo, ProfileMetadata, ProfileStore,
};
#[cfg(feature = "s3")]
pub use store::{S3Bucket, S3Config};
