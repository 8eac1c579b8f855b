// SPDX-FileCopyrightText: © 2025 pprof-me Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Handler-boundary error type.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use pprof_me_core::StoreError;
use thiserror::Error;
use tracing::{error, warn};

use crate::fetch_proxy::ProxyError;
use crate::orchestrator::OrchestratorError;
use crate::visualizer::VisualizerError;

/// Errors a handler can return. Bodies are plain text.
#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed body, missing field, or bad id.
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    /// Capture tool produced nothing, or an upstream/orchestrator call failed.
    #[error("{0}")]
    UpstreamUnavailable(String),
    /// Store I/O failure.
    #[error("{0}")]
    Backend(String),
    #[error("{0}")]
    SidecarNotReady(String),
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::Backend(_) | Self::SidecarNotReady(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "Request failed");
        } else {
            warn!(status = status.as_u16(), error = %self, "Request rejected");
        }
        (status, self.to_string()).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => Self::NotFound(err.to_string()),
            StoreError::MalformedId(_) => Self::BadRequest(err.to_string()),
            StoreError::Backend(_) => Self::Backend(err.to_string()),
        }
    }
}

impl From<VisualizerError> for AppError {
    fn from(err: VisualizerError) -> Self {
        match err {
            VisualizerError::Store(e) => e.into(),
            VisualizerError::Sidecar(e) => {
                Self::UpstreamUnavailable(format!("visualizer request failed: {e}"))
            },
            other => Self::Internal(format!("failed to create pprof proxy: {other}")),
        }
    }
}

impl From<OrchestratorError> for AppError {
    fn from(err: OrchestratorError) -> Self {
        Self::UpstreamUnavailable(format!("orchestrator error: {err}"))
    }
}

impl From<ProxyError> for AppError {
    fn from(err: ProxyError) -> Self {
        Self::UpstreamUnavailable(format!("failed to proxy request: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_map_to_status() {
        let cases = [
            (StoreError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (StoreError::MalformedId("x".into()), StatusCode::BAD_REQUEST),
            (StoreError::Backend("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status(), status);
        }
    }

    #[test]
    fn test_not_found_body_names_profile() {
        let err = AppError::from(StoreError::NotFound("unknown".into()));
        assert_eq!(err.to_string(), "could not find profile for \"unknown\"");
    }

    #[test]
    fn test_upstream_is_bad_gateway() {
        assert_eq!(AppError::UpstreamUnavailable(String::new()).status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            AppError::SidecarNotReady(String::new()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
