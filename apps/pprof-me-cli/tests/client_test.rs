// SPDX-FileCopyrightText: © 2025 pprof-me Contributors
//
// SPDX-License-Identifier: MPL-2.0

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::disallowed_macros,
    clippy::uninlined_format_args
)]

use std::sync::Arc;

use pprof_me_api::ProfileType;
use pprof_me_core::{MemStore, ProfileStore};
use pprof_me_server::Config;
use tokio::net::TcpListener;
use tokio::time::Duration;

async fn start_test_server() -> Option<(String, Arc<dyn ProfileStore>)> {
    let listener = match TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => listener,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => return None,
        Err(e) => panic!("Failed to bind test server listener: {e}"),
    };
    let addr = listener.local_addr().unwrap();
    let store: Arc<dyn ProfileStore> = Arc::new(MemStore::new());
    let (app, state) = pprof_me_server::create_app(Config::default(), Arc::clone(&store), None);
    state.set_self_addr(addr);
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    Some((format!("http://{addr}"), store))
}

#[tokio::test]
async fn upload_list_fetch_round_trip() {
    let Some((server, store)) = start_test_server().await else {
        eprintln!("Skipping client test: local TCP bind not permitted");
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let profile = dir.path().join("cpu.pprof");
    std::fs::write(&profile, b"hellothere").unwrap();
    let binary = dir.path().join("svc");
    std::fs::write(&binary, b"").unwrap();

    let id =
        pprof_me_client::upload_profile(&server, &profile, None, Some(&binary)).await.unwrap();
    let (_, metadata) = store.get_profile(&id).await.unwrap();
    assert_eq!(metadata.app_name, "svc");
    assert_eq!(metadata.binary_md5, "d41d8cd98f00b204e9800998ecf8427e");

    let named = pprof_me_client::upload_profile(&server, &profile, Some("api"), Some(&binary))
        .await
        .unwrap();

    let mut listed: Vec<_> = pprof_me_client::list_profiles(&server)
        .await
        .unwrap()
        .into_iter()
        .map(|p| (p.id, p.app_name))
        .collect();
    listed.sort();
    let mut expected = vec![(id.clone(), "svc".to_string()), (named, "api".to_string())];
    expected.sort();
    assert_eq!(listed, expected);

    let out = dir.path().join("out.pprof");
    let written = pprof_me_client::fetch_profile_to_file(&server, &id, &out).await.unwrap();
    assert_eq!(written, 10);
    assert_eq!(std::fs::read(&out).unwrap(), b"hellothere");

    let ui = pprof_me_client::ui_url(&server, &id).unwrap();
    assert_eq!(ui.as_str(), format!("{server}/profiles/{id}/ui/"));
}

#[tokio::test]
async fn upload_without_binary_is_named_after_profile() {
    let Some((server, store)) = start_test_server().await else {
        eprintln!("Skipping client test: local TCP bind not permitted");
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let profile = dir.path().join("checkout.pprof");
    std::fs::write(&profile, b"hellothere").unwrap();

    let id = pprof_me_client::upload_profile(&server, &profile, None, None).await.unwrap();
    let (_, metadata) = store.get_profile(&id).await.unwrap();
    assert_eq!(metadata.app_name, "checkout");
    assert!(metadata.binary_md5.is_empty());

    let listed = pprof_me_client::list_profiles(&server).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].app_name, "checkout");
}

#[tokio::test]
async fn server_errors_surface_as_client_errors() {
    let Some((server, _store)) = start_test_server().await else {
        eprintln!("Skipping client test: local TCP bind not permitted");
        return;
    };

    let err = pprof_me_client::fetch_profile(&server, "unknown").await.unwrap_err();
    assert!(err.to_string().contains("404"), "{err}");

    // No orchestrator adapter is configured.
    let err = pprof_me_client::capture_profile(&server, "n", "p", ProfileType::Heap)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("400"), "{err}");
}
