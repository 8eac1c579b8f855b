// SPDX-FileCopyrightText: © 2025 pprof-me Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Error types shared by every profile store backend.

use thiserror::Error;

use crate::id::IdError;

/// Errors returned by [`ProfileStore`](crate::store::ProfileStore) operations.
///
/// Callers at the HTTP boundary map these onto status codes: `NotFound` is a
/// 404, `MalformedId` a 400, and `Backend` a 500.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No committed payload exists for the id.
    #[error("could not find profile for {0:?}")]
    NotFound(String),

    /// The id does not match the format the backend expects.
    #[error("malformed profile id: {0}")]
    MalformedId(String),

    /// Transport or storage failure, carrying the backend's own message.
    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<IdError> for StoreError {
    fn from(err: IdError) -> Self {
        Self::MalformedId(err.to_string())
    }
}

/// Convenience type alias for Results using `StoreError`.
pub type Result<T> = std::result::Result<T, StoreError>;
