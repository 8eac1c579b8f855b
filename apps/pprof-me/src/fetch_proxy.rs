// SPDX-FileCopyrightText: © 2025 pprof-me Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Single-shot upstream proxies used to materialize a profile on demand.
//!
//! While a workload capture is running, the capture tool calls back into
//! `/profiles/{id}/debug/pprof/profile`. That request is answered by the
//! [`RequestProxy`] registered under `id`, and the body it returns is what
//! gets stored.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use axum::{
    body::Body,
    http::{
        header::{self, HeaderName, HeaderValue},
        HeaderMap, Method, StatusCode, Uri,
    },
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use reqwest::Url;
use thiserror::Error;
use tracing::debug;

use crate::orchestrator::{KubeClient, OrchestratorError};

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid proxy target: {0}")]
    InvalidTarget(String),
    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

/// Buffered upstream response, kept so the body can be both returned to the
/// caller and stored.
#[derive(Debug)]
pub struct ProxiedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl IntoResponse for ProxiedResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Joins two query strings with a single `&`.
pub fn merge_query(target: Option<&str>, inbound: Option<&str>) -> Option<String> {
    let target = target.filter(|q| !q.is_empty());
    let inbound = inbound.filter(|q| !q.is_empty());
    match (target, inbound) {
        (Some(a), Some(b)) => Some(format!("{a}&{b}")),
        (Some(q), None) | (None, Some(q)) => Some(q.to_string()),
        (None, None) => None,
    }
}

/// Forwards to a fixed URL.
#[derive(Debug, Clone)]
pub struct UrlProxy {
    target: Url,
}

impl UrlProxy {
    /// # Errors
    ///
    /// Returns [`ProxyError::InvalidTarget`] unless `target` is an absolute
    /// http(s) URL.
    pub fn new(target: &str) -> Result<Self, ProxyError> {
        let target =
            Url::parse(target).map_err(|e| ProxyError::InvalidTarget(format!("{target}: {e}")))?;
        if !matches!(target.scheme(), "http" | "https") || target.host_str().is_none() {
            return Err(ProxyError::InvalidTarget(target.to_string()));
        }
        Ok(Self { target })
    }

    async fn proxy(
        &self,
        client: &reqwest::Client,
        method: Method,
        uri: &Uri,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<ProxiedResponse, ProxyError> {
        let mut url = self.target.clone();
        let query = merge_query(self.target.query(), uri.query());
        url.set_query(query.as_deref());

        let mut outbound_headers = HeaderMap::new();
        for (name, value) in headers {
            if name != header::HOST && !is_hop_by_hop(name) {
                outbound_headers.append(name, value.clone());
            }
        }
        if !outbound_headers.contains_key(header::USER_AGENT) {
            outbound_headers.insert(header::USER_AGENT, HeaderValue::from_static(""));
        }

        debug!(url = %url, method = %method, "Proxying fetch to URL target");
        let response =
            client.request(method, url).headers(outbound_headers).body(body).send().await?;

        let status = response.status();
        let mut response_headers = HeaderMap::new();
        for (name, value) in response.headers() {
            if !is_hop_by_hop(name) && name != header::CONTENT_LENGTH {
                response_headers.append(name, value.clone());
            }
        }
        let body = response.bytes().await?;
        Ok(ProxiedResponse { status, headers: response_headers, body })
    }
}

/// Fetches a path from a pod through the orchestrator API.
#[derive(Debug, Clone)]
pub struct PodProxy {
    client: Arc<KubeClient>,
    namespace: String,
    pod: String,
    path: String,
}

impl PodProxy {
    pub fn new(client: Arc<KubeClient>, namespace: &str, pod: &str, path: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
            pod: pod.to_string(),
            path: path.to_string(),
        }
    }

    async fn proxy(&self, uri: &Uri) -> Result<ProxiedResponse, ProxyError> {
        let body =
            self.client.pod_proxy_get(&self.namespace, &self.pod, &self.path, uri.query()).await?;
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
        Ok(ProxiedResponse { status: StatusCode::OK, headers, body })
    }
}

#[derive(Debug, Clone)]
pub enum RequestProxy {
    Url(UrlProxy),
    Pod(PodProxy),
}

impl RequestProxy {
    /// Identification for logs.
    pub fn describe(&self) -> String {
        match self {
            Self::Url(p) => format!("url {}", p.target),
            Self::Pod(p) => format!("pod {}/{} {}", p.namespace, p.pod, p.path),
        }
    }

    /// Forwards the inbound request and returns the buffered upstream
    /// response. The caller both replies with it and keeps its body.
    ///
    /// # Errors
    ///
    /// Returns a [`ProxyError`] if the upstream cannot be reached.
    pub async fn proxy_and_return_body(
        &self,
        client: &reqwest::Client,
        method: Method,
        uri: &Uri,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<ProxiedResponse, ProxyError> {
        match self {
            Self::Url(p) => p.proxy(client, method, uri, headers, body).await,
            Self::Pod(p) => p.proxy(uri).await,
        }
    }
}

/// Pending fetch proxies keyed by profile id.
#[derive(Debug, Default)]
pub struct FetchProxyRegistry {
    entries: Mutex<HashMap<String, Arc<RequestProxy>>>,
}

impl FetchProxyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `proxy` under `id`. The entry is removed when the returned
    /// guard drops, if it has not been removed already.
    pub fn register(&self, id: &str, proxy: RequestProxy) -> Registration<'_> {
        debug!(profile_id = %id, proxy = %proxy.describe(), "Registering fetch proxy");
        self.lock().insert(id.to_string(), Arc::new(proxy));
        Registration { registry: self, id: id.to_string() }
    }

    pub fn get(&self, id: &str) -> Option<Arc<RequestProxy>> {
        self.lock().get(id).cloned()
    }

    pub fn remove(&self, id: &str) -> Option<Arc<RequestProxy>> {
        self.lock().remove(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<RequestProxy>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears a registry entry on drop, including when the registering request
/// is cancelled.
#[must_use = "dropping the registration removes the entry immediately"]
pub struct Registration<'a> {
    registry: &'a FetchProxyRegistry,
    id: String,
}

impl Registration<'_> {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if self.registry.remove(&self.id).is_some() {
            debug!(profile_id = %self.id, "Cleared unused fetch proxy");
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_merge_query() {
        assert_eq!(merge_query(Some("a=1"), Some("b=2")).as_deref(), Some("a=1&b=2"));
        assert_eq!(merge_query(Some("a=1"), None).as_deref(), Some("a=1"));
        assert_eq!(merge_query(Some(""), Some("b=2")).as_deref(), Some("b=2"));
        assert_eq!(merge_query(None, Some("")), None);
    }

    #[test]
    fn test_url_proxy_rejects_bad_targets() {
        assert!(UrlProxy::new("http://127.0.0.1:6060/debug/pprof/heap").is_ok());
        assert!(matches!(UrlProxy::new("not a url"), Err(ProxyError::InvalidTarget(_))));
        assert!(matches!(UrlProxy::new("file:///etc/passwd"), Err(ProxyError::InvalidTarget(_))));
    }

    #[test]
    fn test_registration_clears_on_drop() {
        let registry = FetchProxyRegistry::new();
        let proxy = RequestProxy::Url(UrlProxy::new("http://127.0.0.1:1/x").unwrap());
        {
            let reg = registry.register("id1", proxy);
            assert_eq!(reg.id(), "id1");
            assert!(registry.get("id1").is_some());
        }
        assert!(registry.get("id1").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_before_drop_is_fine() {
        let registry = FetchProxyRegistry::new();
        let proxy = RequestProxy::Url(UrlProxy::new("http://127.0.0.1:1/x").unwrap());
        let reg = registry.register("id1", proxy);
        assert!(registry.remove("id1").is_some());
        drop(reg);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_describe() {
        let proxy = RequestProxy::Url(UrlProxy::new("http://host:1/p").unwrap());
        assert_eq!(proxy.describe(), "url http://host:1/p");
    }
}
