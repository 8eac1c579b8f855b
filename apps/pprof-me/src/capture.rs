// SPDX-FileCopyrightText: © 2025 pprof-me Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! One-shot capture: runs `pprof -top` against this server's own fetch
//! endpoint so the registered fetch proxy pulls the profile in.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

/// URL the capture tool and sidecars use to download profile `id`.
pub fn profile_fetch_url(base: &str, id: &str) -> String {
    format!("{}/profiles/{id}/debug/pprof/profile", base.trim_end_matches('/'))
}

/// Runs the capture tool against `url` and waits for it to exit. Output is
/// logged; whether a profile was stored is for the caller to check.
///
/// # Errors
///
/// Returns an I/O error if the tool cannot be started, or
/// [`std::io::ErrorKind::TimedOut`] if it runs longer than `timeout`.
pub async fn run_capture_tool(
    pprof_path: &str,
    url: &str,
    timeout: Duration,
) -> std::io::Result<std::process::ExitStatus> {
    let mut command = Command::new(pprof_path);
    command
        .arg("-top")
        .arg(url)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(url = %url, "Running capture tool");
    let output = tokio::time::timeout(timeout, command.output())
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "capture tool timed out"))??;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if output.status.success() {
        debug!(
            url = %url,
            stdout = %stdout.trim(),
            stderr = %stderr.trim(),
            "Capture tool finished"
        );
    } else {
        warn!(
            url = %url,
            status = %output.status,
            stderr = %stderr.trim(),
            "Capture tool exited with failure"
        );
    }
    Ok(output.status)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_profile_fetch_url() {
        assert_eq!(
            profile_fetch_url("http://127.0.0.1:7070/", "abc"),
            "http://127.0.0.1:7070/profiles/abc/debug/pprof/profile"
        );
    }

    #[tokio::test]
    async fn test_missing_tool_is_error() {
        let result =
            run_capture_tool("/nonexistent/pprof", "http://127.0.0.1:1/x", Duration::from_secs(1))
                .await;
        assert_eq!(result.unwrap_err().kind(), std::io::ErrorKind::NotFound);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_tool_reports_status() {
        let status = run_capture_tool("false", "http://127.0.0.1:1/x", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!status.success());
    }
}
