// SPDX-FileCopyrightText: © 2025 pprof-me Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! pprof-me server: stores pprof profiles and serves an interactive `pprof`
//! UI for each one behind a path-prefixed reverse proxy.

pub mod capture;
pub mod cli;
pub mod config;
pub mod error;
pub mod fetch_proxy;
pub mod logging;
pub mod orchestrator;
pub mod server;
pub mod state;
pub mod telemetry;
pub mod visualizer;

pub use config::Config;
pub use server::{create_app, start_server};
pub use state::AppState;
