// SPDX-FileCopyrightText: © 2025 pprof-me Contributors
//
// SPDX-License-Identifier: MPL-2.0

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, OnceLock};

use pprof_me_core::ProfileStore;

use crate::config::Config;
use crate::fetch_proxy::FetchProxyRegistry;
use crate::orchestrator::WorkloadProvider;
use crate::visualizer::InstanceManager;

pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn ProfileStore>,
    pub fetch_proxies: FetchProxyRegistry,
    pub instances: InstanceManager,
    pub workloads: Option<Arc<dyn WorkloadProvider>>,
    /// Shared client for fetch targets and sidecars. Redirects are passed
    /// through to the caller.
    pub http: reqwest::Client,
    self_addr: OnceLock<SocketAddr>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn ProfileStore>,
        instances: InstanceManager,
        workloads: Option<Arc<dyn WorkloadProvider>>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            config,
            store,
            fetch_proxies: FetchProxyRegistry::new(),
            instances,
            workloads,
            http,
            self_addr: OnceLock::new(),
        }
    }

    /// Records the address the server actually bound. Only the first call
    /// has an effect.
    pub fn set_self_addr(&self, addr: SocketAddr) {
        let _ = self.self_addr.set(addr);
    }

    /// Base URL this server is reachable at from the local host.
    pub fn self_base_url(&self) -> String {
        let addr = self
            .self_addr
            .get()
            .copied()
            .or_else(|| self.config.server.listen_addr.parse().ok());
        match addr {
            Some(addr) if addr.ip().is_unspecified() => {
                format!("http://{}", SocketAddr::from((Ipv4Addr::LOCALHOST, addr.port())))
            },
            Some(addr) => format!("http://{addr}"),
            None => format!("http://{}", self.config.server.listen_addr),
        }
    }
}
