// SPDX-FileCopyrightText: © 2025 pprof-me Contributors
//
// SPDX-License-Identifier: MPL-2.0

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::disallowed_macros,
    clippy::uninlined_format_args
)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::RawQuery,
    http::{HeaderMap, StatusCode},
    routing::get,
    Router,
};
use pprof_me_core::{MemStore, ProfileStore};
use pprof_me_server::{
    fetch_proxy::{RequestProxy, UrlProxy},
    AppState, Config,
};
use tokio::net::TcpListener;
use tokio::time::Duration;

async fn bind() -> Option<TcpListener> {
    match TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => Some(listener),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => None,
        Err(e) => panic!("Failed to bind test listener: {e}"),
    }
}

/// Stands in for a Go `net/http/pprof` endpoint.
async fn start_upstream() -> Option<SocketAddr> {
    let listener = bind().await?;
    let addr = listener.local_addr().unwrap();
    let app = Router::new()
        .route(
            "/debug/pprof/heap",
            get(|RawQuery(query): RawQuery, headers: HeaderMap| async move {
                let agent = headers
                    .get("user-agent")
                    .map(|v| v.to_str().unwrap_or_default().to_string())
                    .unwrap_or_else(|| "<none>".to_string());
                format!("heap query={} agent={agent}", query.unwrap_or_default())
            }),
        )
        .route("/empty", get(|| async { "" }))
        .route("/missing", get(|| async { (StatusCode::NOT_FOUND, "no such profile") }));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Some(addr)
}

async fn start_test_server() -> Option<(SocketAddr, Arc<AppState>)> {
    let listener = bind().await?;
    let addr = listener.local_addr().unwrap();
    let store: Arc<dyn ProfileStore> = Arc::new(MemStore::new());
    let (app, state) = pprof_me_server::create_app(Config::default(), store, None);
    state.set_self_addr(addr);
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    Some((addr, state))
}

#[tokio::test]
async fn registered_proxy_serves_and_stores_body() {
    let _ = tracing_subscriber::fmt::try_init();
    let (Some(upstream), Some((addr, state))) = (start_upstream().await, start_test_server().await)
    else {
        eprintln!("Skipping fetch proxy test: local TCP bind not permitted");
        return;
    };

    let id = state.store.create_id("svc").await;
    let proxy = UrlProxy::new(&format!("http://{upstream}/debug/pprof/heap?debug=0")).unwrap();
    let registration = state.fetch_proxies.register(&id, RequestProxy::Url(proxy));

    let client = reqwest::Client::new();
    let body = client
        .get(format!("http://{addr}/profiles/{id}/debug/pprof/profile?seconds=5"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "heap query=debug=0&seconds=5 agent=");

    // Captured on the first successful fetch.
    assert!(state.fetch_proxies.get(&id).is_none());
    let (payload, metadata) = state.store.get_profile(&id).await.unwrap();
    assert_eq!(payload.as_ref(), body.as_bytes());
    assert_eq!(metadata.app_name, "svc");
    drop(registration);
    assert!(state.fetch_proxies.is_empty());
}

#[tokio::test]
async fn empty_or_failed_upstream_is_not_stored() {
    let _ = tracing_subscriber::fmt::try_init();
    let (Some(upstream), Some((addr, state))) = (start_upstream().await, start_test_server().await)
    else {
        eprintln!("Skipping fetch proxy test: local TCP bind not permitted");
        return;
    };
    let client = reqwest::Client::new();

    let cases = [
        (format!("http://{upstream}/empty"), StatusCode::BAD_GATEWAY),
        (format!("http://{upstream}/missing"), StatusCode::NOT_FOUND),
        // Nothing listens on port 1.
        ("http://127.0.0.1:1/debug/pprof/heap".to_string(), StatusCode::BAD_GATEWAY),
    ];
    for (target, expected) in cases {
        let id = state.store.create_id("svc").await;
        let _registration = state
            .fetch_proxies
            .register(&id, RequestProxy::Url(UrlProxy::new(&target).unwrap()));
        let response = client
            .get(format!("http://{addr}/profiles/{id}/debug/pprof/profile"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), expected, "target {target}");
        assert!(state.store.get_profile(&id).await.is_err());
        // The entry stays until its registration is dropped.
        assert!(state.fetch_proxies.get(&id).is_some());
    }
}
