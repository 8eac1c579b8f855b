// SPDX-FileCopyrightText: © 2025 pprof-me Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Workload discovery for on-demand captures.
//!
//! A [`WorkloadProvider`] lists the instances a profile can be pulled from
//! and builds the fetch proxy that pulls it. The Kubernetes implementation
//! lives in [`kube`].

use async_trait::async_trait;
use pprof_me_api::{KubeProfileRequest, PodInfo};
use thiserror::Error;

use crate::fetch_proxy::RequestProxy;

pub mod kube;

pub use kube::{KubeClient, PodProvider};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("orchestrator API error: {0}")]
    Api(String),
    #[error("orchestrator API request timed out")]
    Timeout,
    #[error("orchestrator configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for OrchestratorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Api(err.to_string())
        }
    }
}

/// A workload instance a profile can be captured from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    pub namespace: String,
    pub name: String,
    pub app_name: String,
}

impl Workload {
    /// A request matches when its namespace (if given) is equal and its pod
    /// field names either the instance or its app. An empty pod field
    /// matches nothing.
    pub fn matches(&self, request: &KubeProfileRequest) -> bool {
        let namespace_ok = request.namespace.is_empty() || request.namespace == self.namespace;
        let pod_ok = !request.pod_name.is_empty()
            && (request.pod_name == self.name || request.pod_name == self.app_name);
        namespace_ok && pod_ok
    }
}

impl From<Workload> for PodInfo {
    fn from(w: Workload) -> Self {
        Self { namespace: w.namespace, name: w.name, app_name: w.app_name }
    }
}

/// First workload matching `request`, in listing order.
pub fn select_workload<'a>(
    workloads: &'a [Workload],
    request: &KubeProfileRequest,
) -> Option<&'a Workload> {
    workloads.iter().find(|w| w.matches(request))
}

#[async_trait]
pub trait WorkloadProvider: Send + Sync {
    /// # Errors
    ///
    /// Returns an [`OrchestratorError`] if the orchestrator cannot be reached
    /// or rejects the listing.
    async fn list_workloads(&self) -> Result<Vec<Workload>, OrchestratorError>;

    /// Builds a single-shot proxy fetching `path` from `workload`.
    fn proxy_for(&self, workload: &Workload, path: &str) -> RequestProxy;
}
