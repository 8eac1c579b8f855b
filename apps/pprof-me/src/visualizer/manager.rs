// SPDX-FileCopyrightText: © 2025 pprof-me Contributors
//
// SPDX-License-Identifier: MPL-2.0

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use pprof_me_core::ProfileStore;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::instance::VisualizerInstance;
use super::runner::{Runner, RunnerOptions};
use super::VisualizerError;
use crate::telemetry::service_metrics;

struct Inner {
    instances: HashMap<String, Arc<VisualizerInstance>>,
    /// `None` once the port range is used up.
    next_port: Option<u16>,
}

/// Owns every live visualizer, one per profile id.
pub struct InstanceManager {
    store: Arc<dyn ProfileStore>,
    options: RunnerOptions,
    dial_timeout: Duration,
    inner: Mutex<Inner>,
}

impl InstanceManager {
    pub fn new(
        store: Arc<dyn ProfileStore>,
        options: RunnerOptions,
        base_port: u16,
        dial_timeout: Duration,
    ) -> Self {
        Self {
            store,
            options,
            dial_timeout,
            inner: Mutex::new(Inner { instances: HashMap::new(), next_port: Some(base_port) }),
        }
    }

    /// Returns the instance for `id`, starting one on the next port if none
    /// exists. The port counter only advances when the start succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`VisualizerError::Store`] if the profile cannot be read,
    /// [`VisualizerError::PortsExhausted`] when no port is left, or the
    /// runner's error if the sidecar fails to start.
    pub async fn get_or_create(
        &self,
        id: &str,
    ) -> Result<Arc<VisualizerInstance>, VisualizerError> {
        if let Some(instance) = self.inner.lock().await.instances.get(id) {
            return Ok(Arc::clone(instance));
        }

        // Store I/O happens outside the lock.
        let (payload, metadata) = self.store.get_profile(id).await?;

        let mut inner = self.inner.lock().await;
        if let Some(instance) = inner.instances.get(id) {
            return Ok(Arc::clone(instance));
        }
        let port = inner.next_port.ok_or(VisualizerError::PortsExhausted)?;
        let runner = Runner::start(&self.options, id, port, &metadata.app_name, &payload).await?;
        let instance = Arc::new(VisualizerInstance::new(id, runner, self.dial_timeout));
        inner.instances.insert(id.to_string(), Arc::clone(&instance));
        inner.next_port = port.checked_add(1);

        let metrics = service_metrics();
        metrics.instances_created.add(1, &[]);
        metrics.instances_active.record(inner.instances.len() as u64, &[]);
        info!(profile_id = %id, port, "Created visualizer instance");
        Ok(instance)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<VisualizerInstance>> {
        self.inner.lock().await.instances.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.instances.len()
    }

    /// Port the next instance will use.
    pub async fn next_port(&self) -> Option<u16> {
        self.inner.lock().await.next_port
    }

    /// Closes every instance. Failures are logged and do not stop the rest.
    pub async fn close_all(&self) {
        let instances: Vec<_> = {
            let mut inner = self.inner.lock().await;
            inner.instances.drain().collect()
        };
        if instances.is_empty() {
            return;
        }
        info!(count = instances.len(), "Closing visualizer instances");
        for (id, instance) in instances {
            if let Err(e) = instance.close().await {
                warn!(profile_id = %id, error = %e, "Failed to close visualizer instance");
            }
        }
        service_metrics().instances_active.record(0, &[]);
    }
}
