// SPDX-FileCopyrightText: © 2025 pprof-me Contributors
//
// SPDX-License-Identifier: MPL-2.0

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// Prefix for every environment variable the server reads.
pub const ENV_PREFIX: &str = "PPROF_ME_";

/// Log level for filtering messages.
#[derive(Deserialize, Serialize, Debug, Clone, Default, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

const fn default_true() -> bool {
    true
}

const fn default_max_body_size() -> usize {
    // Profiles are uploaded base64-encoded inside a JSON body
    100 * 1024 * 1024
}

const fn default_shutdown_timeout_secs() -> u64 {
    5
}

/// HTTP server configuration.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct ServerConfig {
    /// Address to listen on. Also used to build the callback URL handed to
    /// the capture tool, so it must be reachable from this host.
    pub listen_addr: String,
    /// Maximum request body size in bytes (default: 100MB)
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
    /// Grace period for in-flight requests on shutdown. Sidecars are killed
    /// once it elapses.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:7070".to_string(),
            max_body_size: default_max_body_size(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

/// Object-storage settings. Credentials and region come from the standard
/// AWS environment variables.
#[derive(Deserialize, Serialize, Debug, Clone, Default, JsonSchema)]
pub struct AwsConfig {
    /// Bucket to store profiles in. When unset, profiles are kept in memory.
    pub s3_bucket: Option<String>,
    /// Custom S3 endpoint (e.g. a local MinIO). Forces path-style addressing.
    pub s3_endpoint: Option<String>,
}

fn default_app_name_label() -> String {
    "app".to_string()
}

/// Orchestrator (Kubernetes) settings for on-demand captures.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct KubeConfig {
    /// Use the pod's service account to talk to the API server.
    #[serde(default)]
    pub in_cluster: bool,
    /// Path to a kubeconfig file, used when not running in-cluster.
    pub config_path: Option<String>,
    /// Label selector applied when listing pods (e.g. `team=backend`).
    #[serde(default)]
    pub pod_label_filter: String,
    /// Namespace to list pods in. Empty means all namespaces.
    #[serde(default)]
    pub namespace: String,
    /// Pod label carrying the application name.
    #[serde(default = "default_app_name_label")]
    pub app_name_label: String,
}

impl Default for KubeConfig {
    fn default() -> Self {
        Self {
            in_cluster: false,
            config_path: None,
            pod_label_filter: String::new(),
            namespace: String::new(),
            app_name_label: default_app_name_label(),
        }
    }
}

impl KubeConfig {
    /// Whether an orchestrator adapter should be started at all.
    pub fn enabled(&self) -> bool {
        self.in_cluster || self.config_path.as_deref().is_some_and(|p| !p.is_empty())
    }
}

fn default_pprof_path() -> String {
    "pprof".to_string()
}

const fn default_base_port() -> u16 {
    8888
}

const fn default_readiness_attempts() -> u32 {
    10
}

const fn default_readiness_interval_ms() -> u64 {
    250
}

const fn default_dial_timeout_ms() -> u64 {
    10
}

fn default_temp_dir_prefix() -> String {
    "pprof-me".to_string()
}

const fn default_capture_timeout_secs() -> u64 {
    120
}

/// Settings for the `pprof` sidecars and the capture tool.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct VisualizerConfig {
    /// Path or name (resolved via PATH) of the `pprof` executable.
    #[serde(default = "default_pprof_path")]
    pub pprof_path: String,
    /// First loopback port handed to a sidecar.
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    #[serde(default = "default_readiness_attempts")]
    pub readiness_attempts: u32,
    #[serde(default = "default_readiness_interval_ms")]
    pub readiness_interval_ms: u64,
    /// Timeout of a single readiness dial.
    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,
    /// Sidecar working directories are named `<prefix>-<id>...`.
    #[serde(default = "default_temp_dir_prefix")]
    pub temp_dir_prefix: String,
    /// Parent of the sidecar working directories (default: system temp dir).
    pub temp_root: Option<PathBuf>,
    /// Upper bound on a one-shot `pprof -top` capture.
    #[serde(default = "default_capture_timeout_secs")]
    pub capture_timeout_secs: u64,
}

impl Default for VisualizerConfig {
    fn default() -> Self {
        Self {
            pprof_path: default_pprof_path(),
            base_port: default_base_port(),
            readiness_attempts: default_readiness_attempts(),
            readiness_interval_ms: default_readiness_interval_ms(),
            dial_timeout_ms: default_dial_timeout_ms(),
            temp_dir_prefix: default_temp_dir_prefix(),
            temp_root: None,
            capture_timeout_secs: default_capture_timeout_secs(),
        }
    }
}

impl VisualizerConfig {
    pub const fn readiness_interval(&self) -> Duration {
        Duration::from_millis(self.readiness_interval_ms)
    }

    pub const fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub const fn capture_timeout(&self) -> Duration {
        Duration::from_secs(self.capture_timeout_secs)
    }
}

/// Telemetry configuration (OpenTelemetry metrics).
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct TelemetryConfig {
    #[serde(default = "default_true")]
    pub enable: bool,
    /// OTLP/HTTP metrics endpoint. Metrics are collected locally when unset.
    pub otlp_endpoint: Option<String>,
    #[serde(default)]
    pub otlp_headers: HashMap<String, String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { enable: true, otlp_endpoint: None, otlp_headers: HashMap::new() }
    }
}

/// Log file format options.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text format (faster, lower CPU overhead)
    #[default]
    Text,
    /// JSON format (structured, better for log aggregation)
    Json,
}

/// Logging configuration for console and file output.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct LogConfig {
    #[serde(default)]
    pub console_enable: bool,
    #[serde(default)]
    pub file_enable: bool,
    #[serde(default)]
    pub console_level: LogLevel,
    #[serde(default)]
    pub file_level: LogLevel,
    #[serde(default)]
    pub file_path: String,
    /// Format for file logging: "text" (default) or "json"
    #[serde(default)]
    pub file_format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            console_enable: true,
            file_enable: false,
            console_level: LogLevel::default(),
            file_level: LogLevel::Info,
            file_path: "./pprof-me.log".to_string(),
            file_format: LogFormat::default(),
        }
    }
}

/// Root configuration for the pprof-me server.
#[derive(Deserialize, Serialize, Default, Debug, Clone, JsonSchema)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub aws: AwsConfig,

    #[serde(default)]
    pub kube: KubeConfig,

    #[serde(default)]
    pub visualizer: VisualizerConfig,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug)]
pub struct ConfigLoadResult {
    pub config: Config,
    pub file_missing: Option<String>,
}

/// Maps an environment key (prefix already stripped) onto a config path.
///
/// Flat names like `LISTEN_ADDR`, `AWS_S3_BUCKET` and `KUBE_NAMESPACE` land
/// in their sections; any key containing `__` is taken as an explicit nested
/// path (`LOG__CONSOLE_LEVEL` -> `log.console_level`).
pub fn env_key_to_path(key: &str) -> String {
    let key = key.to_ascii_lowercase();
    if key.contains("__") {
        return key.replace("__", ".");
    }
    match key.as_str() {
        "listen_addr" | "max_body_size" | "shutdown_timeout_secs" => format!("server.{key}"),
        "pprof_path" => format!("visualizer.{key}"),
        _ => {
            for section in ["aws", "kube"] {
                if let Some(rest) = key.strip_prefix(section).and_then(|r| r.strip_prefix('_')) {
                    return format!("{section}.{rest}");
                }
            }
            key
        },
    }
}

/// Loads the application configuration from defaults, a TOML file, and environment variables.
///
/// # Errors
///
/// Returns an error if:
/// - The configuration file exists but contains invalid TOML syntax
/// - Environment variables are set but contain invalid values
pub fn load(config_path: &str) -> Result<ConfigLoadResult, Box<figment::Error>> {
    let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

    let mut file_missing = None;

    // Try to load the config file, but don't fail if it doesn't exist
    if std::path::Path::new(config_path).exists() {
        figment = figment.merge(Toml::file(config_path));
    } else {
        file_missing = Some(config_path.to_string());
    }

    let env = Env::prefixed(ENV_PREFIX).map(|key| env_key_to_path(key.as_str()).into());
    let config: Config = figment.merge(env).extract().map_err(Box::new)?;

    Ok(ConfigLoadResult { config, file_missing })
}

/// Generates the default configuration as a pretty-printed TOML string.
///
/// # Errors
///
/// Returns an error if the default configuration cannot be serialized to TOML.
pub fn generate_default() -> Result<String, toml::ser::Error> {
    toml::to_string_pretty(&Config::default())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_env_key_mapping() {
        assert_eq!(env_key_to_path("LISTEN_ADDR"), "server.listen_addr");
        assert_eq!(env_key_to_path("AWS_S3_BUCKET"), "aws.s3_bucket");
        assert_eq!(env_key_to_path("aws_s3_endpoint"), "aws.s3_endpoint");
        assert_eq!(env_key_to_path("KUBE_IN_CLUSTER"), "kube.in_cluster");
        assert_eq!(env_key_to_path("KUBE_POD_LABEL_FILTER"), "kube.pod_label_filter");
        assert_eq!(env_key_to_path("KUBE_APP_NAME_LABEL"), "kube.app_name_label");
        assert_eq!(env_key_to_path("LOG__CONSOLE_LEVEL"), "log.console_level");
        assert_eq!(env_key_to_path("VISUALIZER__BASE_PORT"), "visualizer.base_port");
        assert_eq!(env_key_to_path("KUBERNETES"), "kubernetes");
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.listen_addr, "127.0.0.1:7070");
        assert_eq!(config.server.shutdown_timeout_secs, 5);
        assert_eq!(config.visualizer.base_port, 8888);
        assert_eq!(config.visualizer.readiness_attempts, 10);
        assert_eq!(config.visualizer.readiness_interval(), Duration::from_millis(250));
        assert_eq!(config.visualizer.dial_timeout(), Duration::from_millis(10));
        assert_eq!(config.kube.app_name_label, "app");
        assert!(!config.kube.enabled());
        assert!(config.aws.s3_bucket.is_none());
    }

    #[test]
    fn test_load_layers_file_and_env() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "pprof-me.toml",
                r#"
                [server]
                listen_addr = "0.0.0.0:9000"

                [visualizer]
                base_port = 9100
                "#,
            )?;
            jail.set_env("PPROF_ME_LISTEN_ADDR", "127.0.0.1:7171");
            jail.set_env("PPROF_ME_AWS_S3_BUCKET", "profiles");
            jail.set_env("PPROF_ME_KUBE_NAMESPACE", "prod");
            jail.set_env("PPROF_ME_KUBE_IN_CLUSTER", "true");
            jail.set_env("PPROF_ME_LOG__CONSOLE_LEVEL", "debug");

            let result = load("pprof-me.toml").unwrap();
            assert!(result.file_missing.is_none());
            let config = result.config;
            assert_eq!(config.server.listen_addr, "127.0.0.1:7171");
            assert_eq!(config.visualizer.base_port, 9100);
            assert_eq!(config.aws.s3_bucket.as_deref(), Some("profiles"));
            assert_eq!(config.kube.namespace, "prod");
            assert!(config.kube.enabled());
            assert!(matches!(config.log.console_level, LogLevel::Debug));
            Ok(())
        });
    }

    #[test]
    fn test_missing_file_is_reported() {
        figment::Jail::expect_with(|_jail| {
            let result = load("does-not-exist.toml").unwrap();
            assert_eq!(result.file_missing.as_deref(), Some("does-not-exist.toml"));
            assert_eq!(result.config.server.listen_addr, "127.0.0.1:7070");
            Ok(())
        });
    }

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let text = generate_default().unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.server.listen_addr, Config::default().server.listen_addr);
    }
}
