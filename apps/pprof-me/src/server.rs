// SPDX-FileCopyrightText: © 2025 pprof-me Contributors
//
// SPDX-License-Identifier: MPL-2.0

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, MatchedPath, Path, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use opentelemetry::KeyValue;
use pprof_me_api::{
    HealthResponse, KubeProfileRequest, PodListResponse, ProfileListInfo, ProfileListResponse,
    ProfilePostRequest, ProfilePostResponse,
};
use pprof_me_core::{
    MemStore, ObjectStore, ProfileMetadata, ProfileStore, S3Bucket, S3Config, StoreError,
};
use time::OffsetDateTime;
use tower::ServiceBuilder;
use tower_http::trace::{DefaultOnFailure, DefaultOnResponse, TraceLayer};
use tracing::{error, info, warn};

use crate::capture::{profile_fetch_url, run_capture_tool};
use crate::config::Config;
use crate::error::AppError;
use crate::orchestrator::{select_workload, PodProvider, WorkloadProvider};
use crate::state::AppState;
use crate::telemetry::{http_metrics, service_metrics};
use crate::visualizer::{InstanceManager, RunnerOptions};

type HandlerResult<T> = Result<T, AppError>;

async fn healthz_handler() -> Json<HealthResponse> {
    Json(HealthResponse::default())
}

async fn create_profile_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> HandlerResult<(StatusCode, Json<ProfilePostResponse>)> {
    let request: ProfilePostRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("invalid request body: {e}")))?;

    let id = match request.kube.clone() {
        Some(kube) => ingest_from_workload(&state, request, &kube).await?,
        None => ingest_upload(&state, request).await?,
    };
    Ok((StatusCode::CREATED, Json(ProfilePostResponse { id })))
}

async fn ingest_upload(state: &AppState, request: ProfilePostRequest) -> HandlerResult<String> {
    if request.profile.is_empty() {
        return Err(AppError::BadRequest("profile is required".to_string()));
    }
    let id = state.store.create_id(&request.app_name).await;
    let metadata = ProfileMetadata {
        app_name: request.app_name.clone(),
        version: request.version,
        binary_md5: request.binary_md5,
        timestamp: Some(OffsetDateTime::now_utc()),
    };
    let size = request.profile.len();
    state.store.store_profile(&id, Bytes::from(request.profile), metadata).await?;

    service_metrics().profiles_ingested.add(1, &[KeyValue::new("source", "upload")]);
    info!(profile_id = %id, app_name = %request.app_name, size, "Stored uploaded profile");
    Ok(id)
}

/// Captures a profile from a workload by pointing the capture tool at our
/// own fetch endpoint while a fetch proxy for the workload is registered.
async fn ingest_from_workload(
    state: &AppState,
    request: ProfilePostRequest,
    kube: &KubeProfileRequest,
) -> HandlerResult<String> {
    if kube.pod_name.is_empty() {
        return Err(AppError::BadRequest("kube.pod is required".to_string()));
    }
    let provider = state.workloads.as_ref().ok_or_else(|| {
        AppError::BadRequest("workload capture requires an orchestrator adapter".to_string())
    })?;

    let workloads = provider.list_workloads().await?;
    let workload = select_workload(&workloads, kube).ok_or_else(|| {
        AppError::NotFound(format!(
            "no workload matching namespace {:?} and pod {:?}",
            kube.namespace, kube.pod_name
        ))
    })?;

    let app_name =
        if request.app_name.is_empty() { workload.app_name.clone() } else { request.app_name };
    let proxy = provider.proxy_for(workload, kube.profile_type.debug_path());
    let id = state.store.create_id(&app_name).await;

    {
        let registration = state.fetch_proxies.register(&id, proxy);
        let url = profile_fetch_url(&state.self_base_url(), registration.id());
        let visualizer = &state.config.visualizer;
        if let Err(e) =
            run_capture_tool(&visualizer.pprof_path, &url, visualizer.capture_timeout()).await
        {
            warn!(profile_id = %id, error = %e, "Capture tool failed");
        }
    }

    match state.store.get_profile(&id).await {
        Ok(_) => {},
        Err(StoreError::NotFound(_)) => {
            return Err(AppError::UpstreamUnavailable(format!(
                "failed to capture profile from {}/{}",
                workload.namespace, workload.name
            )));
        },
        Err(e) => return Err(e.into()),
    }

    service_metrics().profiles_ingested.add(1, &[KeyValue::new("source", "workload")]);
    info!(
        profile_id = %id,
        namespace = %workload.namespace,
        pod = %workload.name,
        profile_type = ?kube.profile_type,
        "Captured profile from workload"
    );
    Ok(id)
}

async fn list_profiles_handler(
    State(state): State<Arc<AppState>>,
) -> HandlerResult<Json<ProfileListResponse>> {
    let profiles = state
        .store
        .list_profiles()
        .await?
        .into_iter()
        .map(|p| ProfileListInfo { id: p.id, app_name: p.app_name, timestamp: p.timestamp })
        .collect();
    Ok(Json(ProfileListResponse { profiles }))
}

fn octet_stream(payload: Bytes) -> Response {
    ([(header::CONTENT_TYPE, "application/octet-stream")], payload).into_response()
}

async fn get_profile_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> HandlerResult<Response> {
    let (payload, _) = state.store.get_profile(&id).await?;
    Ok(octet_stream(payload))
}

/// Callback endpoint for the capture tool and sidecars. A pending fetch
/// proxy takes precedence over the store.
async fn fetch_profile_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> HandlerResult<Response> {
    let Some(proxy) = state.fetch_proxies.get(&id) else {
        let (payload, _) = state.store.get_profile(&id).await?;
        return Ok(octet_stream(payload));
    };

    let response =
        proxy.proxy_and_return_body(&state.http, method, &uri, &headers, body).await?;
    if !response.status.is_success() {
        warn!(
            profile_id = %id,
            proxy = %proxy.describe(),
            status = response.status.as_u16(),
            "Fetch proxy upstream returned an error"
        );
        return Ok(response.into_response());
    }
    if response.body.is_empty() {
        return Err(AppError::UpstreamUnavailable(format!(
            "fetch proxy {} returned an empty profile",
            proxy.describe()
        )));
    }

    state.store.store_profile(&id, response.body.clone(), ProfileMetadata::default()).await?;
    state.fetch_proxies.remove(&id);
    info!(
        profile_id = %id,
        proxy = %proxy.describe(),
        size = response.body.len(),
        "Stored fetched profile"
    );
    Ok(response.into_response())
}

async fn ui_redirect_handler(Path(id): Path<String>) -> Redirect {
    Redirect::permanent(&format!("/profiles/{id}/ui/"))
}

async fn ui_index_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> HandlerResult<Response> {
    proxy_ui(&state, &id, "", method, &uri, &headers, body).await
}

async fn ui_handler(
    State(state): State<Arc<AppState>>,
    Path((id, rest)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> HandlerResult<Response> {
    proxy_ui(&state, &id, &rest, method, &uri, &headers, body).await
}

async fn proxy_ui(
    state: &AppState,
    id: &str,
    rest: &str,
    method: Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: Bytes,
) -> HandlerResult<Response> {
    let instance = state.instances.get_or_create(id).await?;
    let visualizer = &state.config.visualizer;
    if !instance
        .readiness()
        .wait(visualizer.readiness_attempts, visualizer.readiness_interval())
        .await
    {
        return Err(AppError::SidecarNotReady(format!(
            "visualizer for profile {id:?} on port {} did not become ready",
            instance.port()
        )));
    }
    Ok(instance.proxy(&state.http, method, rest, uri, headers, body).await?)
}

async fn list_pods_handler(
    State(state): State<Arc<AppState>>,
) -> HandlerResult<Json<PodListResponse>> {
    let provider = state
        .workloads
        .as_ref()
        .ok_or_else(|| AppError::NotFound("no orchestrator adapter configured".to_string()))?;
    let pods = provider.list_workloads().await?.into_iter().map(Into::into).collect();
    Ok(Json(PodListResponse { pods }))
}

async fn metrics_middleware(req: axum::http::Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.extensions().get::<MatchedPath>().map_or_else(
        || req.uri().path().to_owned(),
        |matched_path| matched_path.as_str().to_owned(),
    );

    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();
    let (counter, histogram) = http_metrics();
    let labels = [
        KeyValue::new("http.method", method.to_string()),
        KeyValue::new("http.route", path),
        KeyValue::new("http.status_code", status),
    ];
    counter.add(1, &labels);
    histogram.record(latency, &labels);

    response
}

/// Client for fetch targets and sidecars. Redirects reach the caller
/// unchanged so the sidecar's own redirects can be rewritten.
fn build_http_client() -> reqwest::Client {
    reqwest::Client::builder().redirect(reqwest::redirect::Policy::none()).build().unwrap_or_else(
        |e| {
            warn!(error = %e, "Failed to build HTTP client, using defaults");
            reqwest::Client::new()
        },
    )
}

/// Creates the Axum application with all routes and middleware.
pub fn create_app(
    config: Config,
    store: Arc<dyn ProfileStore>,
    workloads: Option<Arc<dyn WorkloadProvider>>,
) -> (Router, Arc<AppState>) {
    let visualizer = &config.visualizer;
    let instances = InstanceManager::new(
        Arc::clone(&store),
        RunnerOptions {
            pprof_path: visualizer.pprof_path.clone(),
            temp_dir_prefix: visualizer.temp_dir_prefix.clone(),
            temp_root: visualizer.temp_root.clone(),
        },
        visualizer.base_port,
        visualizer.dial_timeout(),
    );
    let max_body_size = config.server.max_body_size;
    let app_state =
        Arc::new(AppState::new(Arc::new(config), store, instances, workloads, build_http_client()));

    let router = Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/profiles", get(list_profiles_handler).post(create_profile_handler))
        .route("/profiles/{id}", get(get_profile_handler))
        .route("/profiles/{id}/debug/pprof/profile", get(fetch_profile_handler))
        .route("/profiles/{id}/ui", get(ui_redirect_handler))
        .route(
            "/profiles/{id}/ui/",
            get(ui_index_handler).put(ui_index_handler).post(ui_index_handler),
        )
        .route("/profiles/{id}/ui/{*rest}", get(ui_handler).put(ui_handler).post(ui_handler))
        .route("/orchestrator/pods", get(list_pods_handler))
        .layer(DefaultBodyLimit::max(max_body_size))
        .with_state(Arc::clone(&app_state))
        .layer(ServiceBuilder::new().layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    let route = request
                        .extensions()
                        .get::<MatchedPath>()
                        .map_or_else(|| request.uri().path(), |matched| matched.as_str());
                    tracing::info_span!(
                        "http_request",
                        http_method = %request.method(),
                        http_route = %route
                    )
                })
                .on_response(DefaultOnResponse::new().level(tracing::Level::DEBUG))
                .on_failure(DefaultOnFailure::new().level(tracing::Level::WARN)),
        ))
        .layer(middleware::from_fn(metrics_middleware));

    (router, app_state)
}

/// Object storage when a bucket is configured, memory otherwise.
pub async fn build_store(config: &Config) -> Arc<dyn ProfileStore> {
    match config.aws.s3_bucket.as_deref().filter(|b| !b.is_empty()) {
        Some(bucket) => {
            let bucket = S3Bucket::connect(S3Config {
                bucket: bucket.to_string(),
                endpoint: config.aws.s3_endpoint.clone(),
            })
            .await;
            Arc::new(ObjectStore::new(bucket))
        },
        None => {
            info!("Using in-memory profile store");
            Arc::new(MemStore::new())
        },
    }
}

/// The Kubernetes adapter, if configured.
///
/// # Errors
///
/// Returns an error if the adapter is enabled but its credentials cannot be
/// loaded.
pub fn build_workload_provider(
    config: &Config,
) -> Result<Option<Arc<dyn WorkloadProvider>>, Box<dyn std::error::Error>> {
    if !config.kube.enabled() {
        return Ok(None);
    }
    let provider = PodProvider::from_config(&config.kube)?;
    info!(
        namespace = %config.kube.namespace,
        label_filter = %config.kube.pod_label_filter,
        "Workload captures enabled"
    );
    Ok(Some(Arc::new(provider)))
}

/// Starts the HTTP server and blocks until shutdown. Sidecars are closed
/// after the server has drained.
///
/// # Errors
///
/// Returns an error if the listen address is invalid, the orchestrator
/// adapter cannot be configured, or the server fails to bind.
///
/// # Panics
///
/// Panics if the Ctrl+C or SIGTERM handler cannot be installed.
pub async fn start_server(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = config.server.listen_addr.parse()?;
    let store = build_store(config).await;
    let workloads = build_workload_provider(config)?;
    let (app, app_state) = create_app(config.clone(), store, workloads);

    // These expect() calls are justified and documented in the function's # Panics section
    #[allow(clippy::expect_used)]
    let shutdown_signal = async {
        let ctrl_c = async {
            tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => {
                info!("Received CTRL-C signal, initiating graceful shutdown");
            },
            () = terminate => {
                info!("Received SIGTERM signal, initiating graceful shutdown");
            },
        }
    };

    let handle = axum_server::Handle::new();
    let grace = Duration::from_secs(config.server.shutdown_timeout_secs);

    tokio::spawn({
        let handle = handle.clone();
        async move {
            shutdown_signal.await;
            handle.graceful_shutdown(Some(grace));
        }
    });

    tokio::spawn({
        let handle = handle.clone();
        let app_state = Arc::clone(&app_state);
        async move {
            if let Some(bound) = handle.listening().await {
                app_state.set_self_addr(bound);
                info!(address = %bound, "HTTP server listening");
            }
        }
    });

    info!(address = %addr, "Starting HTTP API server");
    let result = axum_server::bind(addr).handle(handle).serve(app.into_make_service()).await;

    app_state.instances.close_all().await;

    result.map_err(|e| {
        error!(error = %e, "API server error");
        e.into()
    })
}
