// SPDX-FileCopyrightText: © 2025 pprof-me Contributors
//
// SPDX-License-Identifier: MPL-2.0

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::{
    body::Body,
    http::{
        header::{self, HeaderName, HeaderValue},
        HeaderMap, Method, Uri,
    },
    response::Response,
};
use bytes::Bytes;
use tokio::net::TcpStream;
use tracing::debug;

use super::rewrite::{is_rewritable, rewrite_links, ui_prefix};
use super::runner::Runner;
use super::VisualizerError;

/// Latched "sidecar has bound its port" flag.
#[derive(Debug)]
pub struct Readiness {
    port: u16,
    dial_timeout: Duration,
    active: AtomicBool,
}

impl Readiness {
    pub const fn new(port: u16, dial_timeout: Duration) -> Self {
        Self { port, dial_timeout, active: AtomicBool::new(false) }
    }

    /// True once a dial to the port has succeeded. Never goes back to false.
    pub async fn check_is_active(&self) -> bool {
        if self.active.load(Ordering::Acquire) {
            return true;
        }
        let dial = TcpStream::connect(("127.0.0.1", self.port));
        match tokio::time::timeout(self.dial_timeout, dial).await {
            Ok(Ok(_)) => {
                self.active.store(true, Ordering::Release);
                true
            },
            _ => false,
        }
    }

    /// Polls [`Self::check_is_active`], sleeping `interval` after each of
    /// `attempts` failed checks, then checks once more. The sidecar gets
    /// `attempts * interval` to bind.
    pub async fn wait(&self, attempts: u32, interval: Duration) -> bool {
        for _ in 0..attempts {
            if self.check_is_active().await {
                return true;
            }
            tokio::time::sleep(interval).await;
        }
        self.check_is_active().await
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

/// A sidecar serving one profile's UI, plus the proxy in front of it.
#[derive(Debug)]
pub struct VisualizerInstance {
    id: String,
    prefix: String,
    runner: Runner,
    readiness: Readiness,
}

impl VisualizerInstance {
    pub fn new(id: &str, runner: Runner, dial_timeout: Duration) -> Self {
        let readiness = Readiness::new(runner.port(), dial_timeout);
        Self { id: id.to_string(), prefix: ui_prefix(id), runner, readiness }
    }

    pub const fn port(&self) -> u16 {
        self.runner.port()
    }

    pub const fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    pub const fn runner(&self) -> &Runner {
        &self.runner
    }

    /// Sidecar URL for `rest`, the request path with `/profiles/<id>/ui/`
    /// stripped.
    pub fn upstream_url(&self, rest: &str, query: Option<&str>) -> String {
        let mut url =
            format!("http://127.0.0.1:{}/ui/{}", self.port(), rest.trim_start_matches('/'));
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(query);
        }
        url
    }

    /// Forwards a UI request to the sidecar and rewrites links in the
    /// response.
    ///
    /// # Errors
    ///
    /// Returns [`VisualizerError::Sidecar`] if the sidecar cannot be reached.
    pub async fn proxy(
        &self,
        client: &reqwest::Client,
        method: Method,
        rest: &str,
        uri: &Uri,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Response, VisualizerError> {
        let url = self.upstream_url(rest, uri.query());
        let mut outbound = HeaderMap::new();
        for (name, value) in headers {
            // Bodies must arrive uncompressed to be rewritten.
            if name != header::HOST && name != header::ACCEPT_ENCODING && !is_hop_by_hop(name) {
                outbound.append(name, value.clone());
            }
        }
        debug!(profile_id = %self.id, url = %url, "Proxying to visualizer");
        let upstream = client.request(method, url).headers(outbound).body(body).send().await?;

        let status = upstream.status();
        let mut response_headers = HeaderMap::new();
        for (name, value) in upstream.headers() {
            if !is_hop_by_hop(name) && name != header::CONTENT_LENGTH {
                response_headers.append(name, value.clone());
            }
        }
        let location = response_headers
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(|l| self.rewrite_location(l));
        if let Some(value) = location.and_then(|l| HeaderValue::from_str(&l).ok()) {
            response_headers.insert(header::LOCATION, value);
        }

        let raw = upstream.bytes().await?;
        let body = if is_rewritable(&response_headers) {
            Bytes::from(rewrite_links(&raw, &self.prefix).into_owned())
        } else {
            raw
        };

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }

    fn rewrite_location(&self, location: &str) -> String {
        location.strip_prefix("/ui/").or_else(|| location.strip_prefix('/')).map_or_else(
            || location.to_string(),
            |rest| format!("{}{rest}", self.prefix),
        )
    }

    /// Stops the sidecar and removes its directory.
    ///
    /// # Errors
    ///
    /// See [`Runner::close`].
    pub async fn close(&self) -> Result<(), VisualizerError> {
        self.runner.close().await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_readiness_latches() {
        let listener = match TcpListener::bind("127.0.0.1:0").await {
            Ok(l) => l,
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                eprintln!("Skipping readiness test: local bind not permitted: {e}");
                return;
            },
            Err(e) => panic!("Failed to bind test listener: {e}"),
        };
        let port = listener.local_addr().unwrap().port();
        let readiness = Readiness::new(port, Duration::from_millis(200));
        assert!(readiness.check_is_active().await);

        drop(listener);
        assert!(readiness.check_is_active().await);
        assert!(readiness.wait(1, Duration::ZERO).await);
    }

    #[tokio::test]
    async fn test_readiness_checks_after_last_interval() {
        let port = match std::net::TcpListener::bind("127.0.0.1:0") {
            Ok(l) => l.local_addr().unwrap().port(),
            Err(e) => {
                eprintln!("Skipping readiness test: local bind not permitted: {e}");
                return;
            },
        };
        // Binds after the second check but before the window closes.
        let binder = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            TcpListener::bind(("127.0.0.1", port)).await.unwrap()
        });
        let readiness = Readiness::new(port, Duration::from_millis(10));
        assert!(readiness.wait(2, Duration::from_millis(200)).await);
        drop(binder.await.unwrap());
    }

    #[tokio::test]
    async fn test_readiness_false_when_nothing_listens() {
        let port = {
            let listener = match std::net::TcpListener::bind("127.0.0.1:0") {
                Ok(l) => l,
                Err(e) => {
                    eprintln!("Skipping readiness test: local bind not permitted: {e}");
                    return;
                },
            };
            listener.local_addr().unwrap().port()
        };
        let readiness = Readiness::new(port, Duration::from_millis(10));
        assert!(!readiness.wait(3, Duration::from_millis(5)).await);
    }
}
