// SPDX-FileCopyrightText: © 2025 pprof-me Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Supervised `pprof -http` child process.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Mutex, PoisonError};

use bytes::Bytes;
use tempfile::TempDir;
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::VisualizerError;

/// Variable pointing the sidecar's own scratch space at the runner's
/// working directory.
pub const PPROF_TMPDIR_ENV: &str = "PPROF_TMPDIR";

/// Where and how to launch sidecars.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub pprof_path: String,
    pub temp_dir_prefix: String,
    /// Parent of the per-runner directories; the system temp dir if unset.
    pub temp_root: Option<PathBuf>,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            pprof_path: "pprof".to_string(),
            temp_dir_prefix: "pprof-me".to_string(),
            temp_root: None,
        }
    }
}

/// Keeps `[A-Za-z0-9._-]`, replacing everything else with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect();
    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "profile".to_string()
    } else {
        trimmed.to_string()
    }
}

async fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    tokio::fs::write(path, contents).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700)).await?;
    }
    Ok(())
}

/// A running sidecar and the directory it owns.
#[derive(Debug)]
pub struct Runner {
    port: u16,
    dir_path: PathBuf,
    dir: Mutex<Option<TempDir>>,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Runner {
    /// Materializes `payload` into a fresh directory and launches the
    /// sidecar on `127.0.0.1:<port>`. The directory is removed if anything
    /// fails before the child is running.
    ///
    /// # Errors
    ///
    /// Returns [`VisualizerError::Io`] if the directory or profile file
    /// cannot be written, and [`VisualizerError::Spawn`] if the child does
    /// not start.
    pub async fn start(
        options: &RunnerOptions,
        id: &str,
        port: u16,
        app_name: &str,
        payload: &Bytes,
    ) -> Result<Self, VisualizerError> {
        let root = options.temp_root.clone().unwrap_or_else(std::env::temp_dir);
        let prefix = format!("{}-{}-", options.temp_dir_prefix, sanitize_file_name(id));
        let dir = tempfile::Builder::new().prefix(&prefix).tempdir_in(&root)?;

        let profile_path = dir.path().join(sanitize_file_name(app_name));
        // On error `dir` is dropped here, which removes it.
        write_private(&profile_path, payload).await?;

        let mut command = Command::new(&options.pprof_path);
        command
            .arg(format!("-http=127.0.0.1:{port}"))
            .arg("-no_browser")
            .arg(&profile_path)
            .env(PPROF_TMPDIR_ENV, dir.path())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        let mut child = command
            .spawn()
            .map_err(|e| VisualizerError::Spawn(format!("{}: {e}", options.pprof_path)))?;

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let task_id = id.to_string();
        let task = tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => match status {
                    Ok(status) if status.success() => {
                        debug!(profile_id = %task_id, port, "Visualizer exited");
                    },
                    Ok(status) => {
                        warn!(
                            profile_id = %task_id,
                            port,
                            %status,
                            "Visualizer exited unexpectedly"
                        );
                    },
                    Err(e) => {
                        warn!(
                            profile_id = %task_id,
                            port,
                            error = %e,
                            "Failed waiting on visualizer"
                        );
                    },
                },
                _ = kill_rx => {
                    if let Err(e) = child.kill().await {
                        warn!(profile_id = %task_id, port, error = %e, "Failed to kill visualizer");
                    }
                },
            }
        });

        info!(profile_id = %id, port, dir = %dir.path().display(), "Started visualizer");
        Ok(Self {
            port,
            dir_path: dir.path().to_path_buf(),
            dir: Mutex::new(Some(dir)),
            kill_tx: Mutex::new(Some(kill_tx)),
            task: Mutex::new(Some(task)),
        })
    }

    pub const fn port(&self) -> u16 {
        self.port
    }

    pub fn dir_path(&self) -> &Path {
        &self.dir_path
    }

    /// Kills the child and removes the working directory. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`VisualizerError::Io`] if the directory cannot be removed.
    pub async fn close(&self) -> Result<(), VisualizerError> {
        let kill_tx = self.kill_tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(tx) = kill_tx {
            // The child may already have exited, closing the receiver.
            let _ = tx.send(());
        }
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(port = self.port, error = %e, "Visualizer supervisor task failed");
            }
        }
        let dir = self.dir.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(dir) = dir {
            dir.close()?;
            debug!(port = self.port, "Removed visualizer directory");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("svc"), "svc");
        assert_eq!(sanitize_file_name("my app/../x"), "my_app_.._x");
        assert_eq!(sanitize_file_name("1700:c3Zj:abc-def"), "1700_c3Zj_abc-def");
        assert_eq!(sanitize_file_name(""), "profile");
        assert_eq!(sanitize_file_name(".."), "profile");
    }

    #[tokio::test]
    async fn test_spawn_failure_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        let options = RunnerOptions {
            pprof_path: "/nonexistent/pprof-binary".to_string(),
            temp_dir_prefix: "pprof-me".to_string(),
            temp_root: Some(root.path().to_path_buf()),
        };
        let result = Runner::start(&options, "id", 18888, "svc", &Bytes::from_static(b"p")).await;
        assert!(matches!(result, Err(VisualizerError::Spawn(_))));
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_close_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        let options = RunnerOptions {
            pprof_path: "sleep".to_string(),
            temp_dir_prefix: "pprof-me".to_string(),
            temp_root: Some(root.path().to_path_buf()),
        };
        // `sleep` rejects the flags and exits; the directory must still be
        // owned by the runner until close.
        let runner = Runner::start(&options, "abc", 18889, "svc", &Bytes::from_static(b"payload"))
            .await
            .unwrap();
        let dir = runner.dir_path().to_path_buf();
        assert!(dir.file_name().unwrap().to_string_lossy().starts_with("pprof-me-abc-"));
        assert_eq!(std::fs::read(dir.join("svc")).unwrap(), b"payload");
        runner.close().await.unwrap();
        assert!(!dir.exists());
        runner.close().await.unwrap();
    }
}
