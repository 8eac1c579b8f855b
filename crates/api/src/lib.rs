// SPDX-FileCopyrightText: © 2025 pprof-me Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! api: JSON bodies exchanged between the pprof-me server and its clients.
//!
//! Binary payloads travel base64-encoded (standard alphabet, padded).
//! Timestamps are RFC 3339 strings.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Which profile to pull from a workload.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProfileType {
    #[default]
    #[serde(rename = "CPU")]
    Cpu,
    #[serde(rename = "HEAP")]
    Heap,
}

impl ProfileType {
    /// Path of the matching handler on a Go `net/http/pprof` server.
    pub const fn debug_path(self) -> &'static str {
        match self {
            Self::Cpu => "debug/pprof/profile",
            Self::Heap => "debug/pprof/heap",
        }
    }
}

/// Names an orchestrator-managed instance to capture a profile from.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct KubeProfileRequest {
    #[serde(default)]
    pub namespace: String,
    /// Pod name, or an app name matched against the pod's app label.
    #[serde(rename = "pod", default)]
    pub pod_name: String,
    #[serde(default)]
    pub profile_type: ProfileType,
}

/// Body of `POST /profiles`.
///
/// Either `profile` carries the payload (direct upload) or `kube` names a
/// workload to capture from.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct ProfilePostRequest {
    #[serde(default, with = "base64_bytes")]
    pub profile: Vec<u8>,
    /// Name of the profiled binary; becomes the profile's app name.
    #[serde(rename = "binary_name", default)]
    pub app_name: String,
    /// Hex MD5 fingerprint of the profiled binary.
    #[serde(default)]
    pub binary_md5: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube: Option<KubeProfileRequest>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProfilePostResponse {
    pub id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProfileListInfo {
    pub id: String,
    pub app_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct ProfileListResponse {
    pub profiles: Vec<ProfileListInfo>,
}

/// A workload instance as reported by the orchestrator.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PodInfo {
    pub namespace: String,
    pub name: String,
    pub app_name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct PodListResponse {
    pub pods: Vec<PodInfo>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self { status: "ok".to_string() }
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        // JSON null is treated like an absent payload.
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded.map_or_else(
            || Ok(Vec::new()),
            |s| STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom),
        )
    }
}
