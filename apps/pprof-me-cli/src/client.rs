// SPDX-FileCopyrightText: © 2025 pprof-me Contributors
//
// SPDX-License-Identifier: MPL-2.0

use std::path::Path;

use bytes::Bytes;
use md5::{Digest, Md5};
use pprof_me_api::{
    KubeProfileRequest, ProfileListInfo, ProfileListResponse, ProfilePostRequest,
    ProfilePostResponse, ProfileType,
};
use tokio::fs;
use tracing::{debug, info};
use url::Url;

pub type ClientResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

fn http_base_url(server_url: &str) -> ClientResult<Url> {
    let mut url = Url::parse(server_url)?;
    match url.scheme() {
        "http" | "https" => {},
        _ => return Err("Server URL must be http(s)".into()),
    }
    url.set_path("");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// Builds `<server>/<segments...>`, percent-encoding each segment.
fn endpoint(server_url: &str, segments: &[&str]) -> ClientResult<Url> {
    let mut url = http_base_url(server_url)?;
    url.path_segments_mut()
        .map_err(|()| "Server URL cannot carry a path")?
        .clear()
        .extend(segments);
    Ok(url)
}

async fn error_for_status(response: reqwest::Response) -> ClientResult<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(format!("Server returned error {status}: {}", body.trim()).into())
}

/// Hex MD5 of the file at `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub async fn binary_fingerprint(path: &Path) -> ClientResult<String> {
    let contents = fs::read(path).await?;
    Ok(hex::encode(Md5::digest(&contents)))
}

/// Name of a binary as recorded with its profiles: the file name of `path`.
pub fn binary_name(path: &Path) -> String {
    path.file_name().map_or_else(|| "unknown".to_string(), |n| n.to_string_lossy().into_owned())
}

/// App name recorded for an upload: `name`, else the binary's file name,
/// else the profile's file stem.
pub fn upload_app_name(profile_path: &Path, name: Option<&str>, binary: Option<&Path>) -> String {
    if let Some(name) = name {
        return name.to_string();
    }
    if let Some(binary) = binary {
        return binary_name(binary);
    }
    profile_path
        .file_stem()
        .map_or_else(|| "unknown".to_string(), |s| s.to_string_lossy().into_owned())
}

/// Uploads a profile file (POST /profiles).
///
/// `binary` is the profiled executable, fingerprinted with MD5. Without it
/// the fingerprint is left empty. See [`upload_app_name`] for the app name.
///
/// # Errors
///
/// Returns an error if a file cannot be read, the request fails, or the
/// server rejects the upload.
pub async fn upload_profile(
    server_url: &str,
    profile_path: &Path,
    name: Option<&str>,
    binary: Option<&Path>,
) -> ClientResult<String> {
    let profile = fs::read(profile_path)
        .await
        .map_err(|e| format!("Failed to read profile {}: {e}", profile_path.display()))?;
    let binary_md5 = match binary {
        Some(path) => binary_fingerprint(path).await?,
        None => String::new(),
    };
    let request = ProfilePostRequest {
        profile,
        app_name: upload_app_name(profile_path, name, binary),
        binary_md5,
        ..ProfilePostRequest::default()
    };
    info!(
        server = %server_url,
        app_name = %request.app_name,
        binary_md5 = %request.binary_md5,
        "Uploading profile"
    );
    post_profile(server_url, &request).await
}

/// Asks the server to capture a profile from an orchestrator-managed pod.
///
/// # Errors
///
/// Returns an error if the request fails or the server cannot capture.
pub async fn capture_profile(
    server_url: &str,
    namespace: &str,
    pod: &str,
    profile_type: ProfileType,
) -> ClientResult<String> {
    let request = ProfilePostRequest {
        kube: Some(KubeProfileRequest {
            namespace: namespace.to_string(),
            pod_name: pod.to_string(),
            profile_type,
        }),
        ..ProfilePostRequest::default()
    };
    info!(server = %server_url, namespace, pod, ?profile_type, "Requesting capture");
    post_profile(server_url, &request).await
}

async fn post_profile(server_url: &str, request: &ProfilePostRequest) -> ClientResult<String> {
    let url = endpoint(server_url, &["profiles"])?;
    let response = reqwest::Client::new().post(url).json(request).send().await?;
    let created: ProfilePostResponse = error_for_status(response).await?.json().await?;
    debug!(id = %created.id, "Profile stored");
    Ok(created.id)
}

/// Lists stored profiles (GET /profiles).
///
/// # Errors
///
/// Returns an error if the request fails or the response cannot be parsed.
pub async fn list_profiles(server_url: &str) -> ClientResult<Vec<ProfileListInfo>> {
    let url = endpoint(server_url, &["profiles"])?;
    let response = reqwest::get(url).await?;
    let list: ProfileListResponse = error_for_status(response).await?.json().await?;
    Ok(list.profiles)
}

/// Downloads a profile's raw bytes (GET /profiles/{id}).
///
/// # Errors
///
/// Returns an error if the request fails or the profile does not exist.
pub async fn fetch_profile(server_url: &str, id: &str) -> ClientResult<Bytes> {
    let url = endpoint(server_url, &["profiles", id])?;
    let response = reqwest::get(url).await?;
    Ok(error_for_status(response).await?.bytes().await?)
}

/// Downloads a profile into `out`, returning the number of bytes written.
///
/// # Errors
///
/// Returns an error if the download fails or `out` cannot be written.
pub async fn fetch_profile_to_file(server_url: &str, id: &str, out: &Path) -> ClientResult<usize> {
    let payload = fetch_profile(server_url, id).await?;
    fs::write(out, &payload)
        .await
        .map_err(|e| format!("Failed to write {}: {e}", out.display()))?;
    Ok(payload.len())
}

/// Browser URL of a profile's visualizer.
///
/// # Errors
///
/// Returns an error if the server URL is invalid.
pub fn ui_url(server_url: &str, id: &str) -> ClientResult<Url> {
    endpoint(server_url, &["profiles", id, "ui", ""])
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn ui_url_keeps_trailing_slash() {
        let url = ui_url("http://localhost:8080/ignored?x=1", "abc").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/profiles/abc/ui/");
    }

    #[test]
    fn endpoint_encodes_ids() {
        let url = endpoint("https://pprof.example", &["profiles", "8426:c3Zj:a b"]).unwrap();
        assert_eq!(url.as_str(), "https://pprof.example/profiles/8426:c3Zj:a%20b");
    }

    #[test]
    fn rejects_non_http_servers() {
        assert!(http_base_url("ftp://example.com").is_err());
        assert!(http_base_url("not a url").is_err());
    }

    #[test]
    fn upload_app_name_fallbacks() {
        let profile = Path::new("/tmp/checkout.cpu.pprof");
        assert_eq!(upload_app_name(profile, Some("api"), Some(Path::new("/bin/svc"))), "api");
        assert_eq!(upload_app_name(profile, None, Some(Path::new("/bin/svc"))), "svc");
        assert_eq!(upload_app_name(profile, None, None), "checkout.cpu");
    }

    #[tokio::test]
    async fn fingerprint_is_hex_md5() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc");
        std::fs::write(&path, b"").unwrap();
        assert_eq!(binary_fingerprint(&path).await.unwrap(), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(binary_name(&path), "svc");
    }
}
