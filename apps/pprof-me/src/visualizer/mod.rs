// SPDX-FileCopyrightText: © 2025 pprof-me Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Per-profile `pprof -http` sidecars and the proxy in front of them.
//!
//! - [`runner`]: spawns and supervises the child process
//! - [`instance`]: readiness latch and reverse proxy for one sidecar
//! - [`rewrite`]: link rewriting under the `/profiles/<id>/ui/` prefix
//! - [`manager`]: lazy creation and port allocation

use pprof_me_core::StoreError;
use thiserror::Error;

pub mod instance;
pub mod manager;
pub mod rewrite;
pub mod runner;

pub use instance::{Readiness, VisualizerInstance};
pub use manager::InstanceManager;
pub use runner::{Runner, RunnerOptions};

#[derive(Debug, Error)]
pub enum VisualizerError {
    #[error("visualizer I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to start visualizer: {0}")]
    Spawn(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("no visualizer ports left")]
    PortsExhausted,
    #[error("visualizer request failed: {0}")]
    Sidecar(#[from] reqwest::Error),
}
