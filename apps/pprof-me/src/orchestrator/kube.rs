// SPDX-FileCopyrightText: © 2025 pprof-me Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Minimal Kubernetes API client: pod listing and the pod proxy subresource.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use reqwest::{header, Url};
use serde::Deserialize;
use tracing::{debug, info};

use super::{OrchestratorError, Workload, WorkloadProvider};
use crate::config::KubeConfig;
use crate::fetch_proxy::{PodProxy, RequestProxy};

/// Timeout for calls through the pod proxy subresource.
pub const POD_PROXY_TIMEOUT: Duration = Duration::from_secs(60);

const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

#[derive(Debug, Clone)]
enum Auth {
    None,
    Token(String),
    /// Re-read on every request; in-cluster tokens are rotated.
    TokenFile(PathBuf),
}

/// Authenticated HTTP client for one API server.
#[derive(Debug, Clone)]
pub struct KubeClient {
    http: reqwest::Client,
    base: Url,
    auth: Auth,
}

fn config_err(msg: impl std::fmt::Display) -> OrchestratorError {
    OrchestratorError::Config(msg.to_string())
}

fn read_file(path: &Path) -> Result<Vec<u8>, OrchestratorError> {
    std::fs::read(path).map_err(|e| config_err(format!("reading {}: {e}", path.display())))
}

impl KubeClient {
    /// Plain client for `base_url`, optionally sending a bearer token.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Config`] if `base_url` does not parse.
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, OrchestratorError> {
        let base = Url::parse(base_url).map_err(config_err)?;
        let auth = token.map_or(Auth::None, Auth::Token);
        Ok(Self { http: reqwest::Client::new(), base, auth })
    }

    /// Builds a client from the server configuration.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Config`] when the service account or
    /// kubeconfig cannot be read.
    pub fn from_config(config: &KubeConfig) -> Result<Self, OrchestratorError> {
        if config.in_cluster {
            return Self::in_cluster();
        }
        match config.config_path.as_deref().filter(|p| !p.is_empty()) {
            Some(path) => Self::from_kubeconfig(Path::new(path)),
            None => Err(config_err("neither in_cluster nor config_path is set")),
        }
    }

    /// Uses the pod's service account.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Config`] outside a cluster.
    pub fn in_cluster() -> Result<Self, OrchestratorError> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST")
            .map_err(|_| config_err("KUBERNETES_SERVICE_HOST is not set"))?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".into());
        let host = if host.contains(':') { format!("[{host}]") } else { host };
        let base = Url::parse(&format!("https://{host}:{port}")).map_err(config_err)?;

        let dir = Path::new(SERVICE_ACCOUNT_DIR);
        let ca = read_file(&dir.join("ca.crt"))?;
        let http = reqwest::Client::builder()
            .add_root_certificate(reqwest::Certificate::from_pem(&ca).map_err(config_err)?)
            .build()
            .map_err(config_err)?;

        info!(api_server = %base, "Using in-cluster Kubernetes configuration");
        Ok(Self { http, base, auth: Auth::TokenFile(dir.join("token")) })
    }

    /// Uses the current context of a kubeconfig file.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Config`] if the file cannot be read or
    /// its current context is incomplete.
    pub fn from_kubeconfig(path: &Path) -> Result<Self, OrchestratorError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| config_err(format!("reading {}: {e}", path.display())))?;
        let kubeconfig: Kubeconfig = serde_saphyr::from_str(&text)
            .map_err(|e| config_err(format!("parsing {}: {e}", path.display())))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let resolved = kubeconfig.resolve()?;

        let mut builder = reqwest::Client::builder();
        let cluster = resolved.cluster;
        if let Some(pem) = pem_source(
            cluster.certificate_authority_data.as_deref(),
            cluster.certificate_authority.as_deref(),
            base_dir,
        )? {
            builder = builder
                .add_root_certificate(reqwest::Certificate::from_pem(&pem).map_err(config_err)?);
        }
        if cluster.insecure_skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let user = resolved.user;
        let cert = pem_source(
            user.client_certificate_data.as_deref(),
            user.client_certificate.as_deref(),
            base_dir,
        )?;
        let key =
            pem_source(user.client_key_data.as_deref(), user.client_key.as_deref(), base_dir)?;
        if let (Some(mut cert), Some(key)) = (cert, key) {
            cert.push(b'\n');
            cert.extend_from_slice(&key);
            builder = builder.identity(reqwest::Identity::from_pem(&cert).map_err(config_err)?);
        }

        let auth = match (user.token, user.token_file) {
            (Some(token), _) => Auth::Token(token),
            (None, Some(file)) => Auth::TokenFile(base_dir.join(file)),
            (None, None) => Auth::None,
        };

        let base = Url::parse(&cluster.server).map_err(config_err)?;
        info!(api_server = %base, kubeconfig = %path.display(), "Using kubeconfig");
        Ok(Self { http: builder.build().map_err(config_err)?, base, auth })
    }

    fn url(&self, path: &str) -> Result<Url, OrchestratorError> {
        let base = self.base.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}/{}", path.trim_start_matches('/'))).map_err(config_err)
    }

    async fn get(&self, url: Url, timeout: Option<Duration>) -> Result<Bytes, OrchestratorError> {
        let mut request = self.http.get(url.clone());
        match &self.auth {
            Auth::None => {},
            Auth::Token(token) => request = request.bearer_auth(token),
            Auth::TokenFile(path) => {
                let token = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| config_err(format!("reading {}: {e}", path.display())))?;
                request = request.bearer_auth(token.trim());
            },
        }
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        debug!(url = %url, "Kubernetes API request");
        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(OrchestratorError::Api(format!(
                "GET {} returned {status}: {}",
                url.path(),
                String::from_utf8_lossy(&body).trim()
            )));
        }
        Ok(body)
    }

    /// Lists pods in `namespace` (all namespaces when empty).
    ///
    /// # Errors
    ///
    /// Returns an [`OrchestratorError`] on transport failure, a non-2xx
    /// status, or an unparseable listing.
    pub async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Pod>, OrchestratorError> {
        let path = if namespace.is_empty() {
            "api/v1/pods".to_string()
        } else {
            format!("api/v1/namespaces/{namespace}/pods")
        };
        let mut url = self.url(&path)?;
        if !label_selector.is_empty() {
            url.query_pairs_mut().append_pair("labelSelector", label_selector);
        }
        let body = self.get(url, None).await?;
        let list: PodList = serde_json::from_slice(&body)
            .map_err(|e| OrchestratorError::Api(format!("decoding pod list: {e}")))?;
        Ok(list.items)
    }

    /// GETs `path` on a pod through the API server's proxy subresource.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Timeout`] after [`POD_PROXY_TIMEOUT`],
    /// or another [`OrchestratorError`] if the call fails.
    pub async fn pod_proxy_get(
        &self,
        namespace: &str,
        pod: &str,
        path: &str,
        query: Option<&str>,
    ) -> Result<Bytes, OrchestratorError> {
        let mut url = self.url(&format!(
            "api/v1/namespaces/{namespace}/pods/{pod}/proxy/{}",
            path.trim_start_matches('/')
        ))?;
        url.set_query(query.filter(|q| !q.is_empty()));
        self.get(url, Some(POD_PROXY_TIMEOUT)).await
    }
}

fn pem_source(
    inline: Option<&str>,
    file: Option<&str>,
    base_dir: &Path,
) -> Result<Option<Vec<u8>>, OrchestratorError> {
    if let Some(data) = inline {
        return STANDARD.decode(data.trim()).map(Some).map_err(config_err);
    }
    file.map(|f| read_file(&base_dir.join(f))).transpose()
}

#[derive(Debug, Deserialize)]
pub struct PodList {
    #[serde(default)]
    pub items: Vec<Pod>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Pod {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PodSpec,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PodSpec {
    #[serde(default)]
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Container {
    #[serde(default)]
    pub image: String,
}

impl Pod {
    /// The value of `label`, else the first container's image name without
    /// registry path or tag.
    pub fn app_name(&self, label: &str) -> String {
        if let Some(app) = self.metadata.labels.get(label) {
            return app.clone();
        }
        self.spec
            .containers
            .first()
            .map(|c| {
                let base = c.image.rsplit('/').next().unwrap_or_default();
                base.split(':').next().unwrap_or_default().to_string()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Kubeconfig {
    #[serde(default)]
    current_context: String,
    #[serde(default)]
    contexts: Vec<Named<ContextEntry>>,
    #[serde(default)]
    clusters: Vec<Named<ClusterEntry>>,
    #[serde(default)]
    users: Vec<Named<UserEntry>>,
}

#[derive(Debug, Deserialize)]
struct Named<T> {
    name: String,
    #[serde(alias = "context", alias = "cluster", alias = "user")]
    value: T,
}

#[derive(Debug, Clone, Deserialize)]
struct ContextEntry {
    cluster: String,
    #[serde(default)]
    user: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ClusterEntry {
    server: String,
    certificate_authority: Option<String>,
    certificate_authority_data: Option<String>,
    #[serde(default)]
    insecure_skip_tls_verify: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct UserEntry {
    token: Option<String>,
    token_file: Option<String>,
    client_certificate: Option<String>,
    client_certificate_data: Option<String>,
    client_key: Option<String>,
    client_key_data: Option<String>,
}

struct ResolvedContext {
    cluster: ClusterEntry,
    user: UserEntry,
}

impl Kubeconfig {
    fn resolve(self) -> Result<ResolvedContext, OrchestratorError> {
        let context = self
            .contexts
            .into_iter()
            .find(|c| c.name == self.current_context)
            .ok_or_else(|| config_err(format!("context {:?} not found", self.current_context)))?
            .value;
        let cluster = self
            .clusters
            .into_iter()
            .find(|c| c.name == context.cluster)
            .ok_or_else(|| config_err(format!("cluster {:?} not found", context.cluster)))?
            .value;
        let user = self
            .users
            .into_iter()
            .find(|u| u.name == context.user)
            .map(|u| u.value)
            .unwrap_or_default();
        Ok(ResolvedContext { cluster, user })
    }
}

/// [`WorkloadProvider`] listing pods through a [`KubeClient`].
pub struct PodProvider {
    client: Arc<KubeClient>,
    namespace: String,
    label_filter: String,
    app_name_label: String,
}

impl PodProvider {
    pub fn new(client: KubeClient, config: &KubeConfig) -> Self {
        let app_name_label = if config.app_name_label.is_empty() {
            "app".to_string()
        } else {
            config.app_name_label.clone()
        };
        Self {
            client: Arc::new(client),
            namespace: config.namespace.clone(),
            label_filter: config.pod_label_filter.clone(),
            app_name_label,
        }
    }

    /// # Errors
    ///
    /// See [`KubeClient::from_config`].
    pub fn from_config(config: &KubeConfig) -> Result<Self, OrchestratorError> {
        Ok(Self::new(KubeClient::from_config(config)?, config))
    }
}

#[async_trait]
impl WorkloadProvider for PodProvider {
    async fn list_workloads(&self) -> Result<Vec<Workload>, OrchestratorError> {
        let pods = self.client.list_pods(&self.namespace, &self.label_filter).await?;
        Ok(pods
            .into_iter()
            .map(|pod| Workload {
                app_name: pod.app_name(&self.app_name_label),
                namespace: pod.metadata.namespace,
                name: pod.metadata.name,
            })
            .collect())
    }

    fn proxy_for(&self, workload: &Workload, path: &str) -> RequestProxy {
        RequestProxy::Pod(PodProxy::new(
            Arc::clone(&self.client),
            &workload.namespace,
            &workload.name,
            path,
        ))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn pod(json: &str) -> Pod {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_app_name_prefers_label() {
        let p = pod(
            r#"{"metadata":{"name":"p","labels":{"app":"svc"}},"spec":{"containers":[{"image":"reg/other:1"}]}}"#,
        );
        assert_eq!(p.app_name("app"), "svc");
    }

    #[test]
    fn test_app_name_falls_back_to_image() {
        let p = pod(
            r#"{"metadata":{"name":"p"},"spec":{"containers":[{"image":"registry:5000/team/svc:1.2"}]}}"#,
        );
        assert_eq!(p.app_name("app"), "svc");
        let p = pod(r#"{"metadata":{"name":"p"},"spec":{"containers":[{"image":"svc"}]}}"#);
        assert_eq!(p.app_name("app"), "svc");
        let p = pod(r#"{"metadata":{"name":"p"}}"#);
        assert_eq!(p.app_name("app"), "");
    }

    #[test]
    fn test_kubeconfig_resolves_current_context() {
        let text = r"
apiVersion: v1
kind: Config
current-context: dev
clusters:
  - name: dev-cluster
    cluster:
      server: https://127.0.0.1:6443
      insecure-skip-tls-verify: true
contexts:
  - name: dev
    context:
      cluster: dev-cluster
      user: dev-user
users:
  - name: dev-user
    user:
      token: abc123
";
        let config: Kubeconfig = serde_saphyr::from_str(text).unwrap();
        let resolved = config.resolve().unwrap();
        assert_eq!(resolved.cluster.server, "https://127.0.0.1:6443");
        assert!(resolved.cluster.insecure_skip_tls_verify);
        assert_eq!(resolved.user.token.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_kubeconfig_missing_context_is_error() {
        let text = "current-context: nope\ncontexts: []\nclusters: []\nusers: []\n";
        let config: Kubeconfig = serde_saphyr::from_str(text).unwrap();
        assert!(matches!(config.resolve(), Err(OrchestratorError::Config(_))));
    }

    #[test]
    fn test_from_kubeconfig_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        std::fs::write(
            &path,
            "current-context: c\ncontexts:\n  - name: c\n    context:\n      cluster: k\n      user: u\nclusters:\n  - name: k\n    cluster:\n      server: http://127.0.0.1:8001\nusers:\n  - name: u\n    user: {}\n",
        )
        .unwrap();
        let client = KubeClient::from_kubeconfig(&path).unwrap();
        assert_eq!(
            client.url("api/v1/pods").unwrap().as_str(),
            "http://127.0.0.1:8001/api/v1/pods"
        );
    }
}
