// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Node Configuration Types
//
// Defines the configuration schema for a Marshal daemon, including:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Docker engine connection settings
// - Orchestration tuning (container naming, driver timeouts, retry and restart backoff)
// - Network and observability settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_VERSION: &str = "marshal.dev/v1";
pub const KIND: &str = "NodeConfig";

/// Top-level Kubernetes-style node configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfigManifest {
    /// API version (must be "marshal.dev/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "NodeConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: NodeConfigSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable node name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfigSpec {
    #[serde(default)]
    pub docker: DockerConfig,

    #[serde(default)]
    pub orchestration: OrchestrationConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Path to the Docker socket. Local defaults (including DOCKER_HOST) when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<String>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per driver call, including the first
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,

    #[serde(default = "default_retry_initial_delay", with = "humantime_serde")]
    pub initial_delay: Duration,

    #[serde(default = "default_retry_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_retry_attempts(),
            initial_delay: default_retry_initial_delay(),
            max_delay: default_retry_max_delay(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_restart_initial_delay", with = "humantime_serde")]
    pub initial_delay: Duration,

    #[serde(default = "default_restart_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: default_restart_initial_delay(),
            max_delay: default_restart_max_delay(),
        }
    }
}

impl BackoffConfig {
    /// Delay before the `attempt`-th retry (0-based), doubling up to `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    /// Prefix of generated container names: `<prefix>_<application>_<goal>`
    #[serde(default = "default_container_prefix")]
    pub container_prefix: String,

    /// Upper bound on every individual container engine call
    #[serde(default = "default_driver_timeout", with = "humantime_serde")]
    pub driver_timeout: Duration,

    #[serde(default)]
    pub driver_retry: RetryConfig,

    /// Delay between a smart-restart goal failing and re-entering its gate
    #[serde(default)]
    pub restart_backoff: BackoffConfig,

    /// A run at least this long resets the restart backoff to `initial_delay`
    #[serde(default = "default_restart_reset_after", with = "humantime_serde")]
    pub restart_reset_after: Duration,

    /// Capacity of each application's transition queue
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,

    /// Directory `./` volume host paths are resolved against
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<PathBuf>,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            container_prefix: default_container_prefix(),
            driver_timeout: default_driver_timeout(),
            driver_retry: RetryConfig::default(),
            restart_backoff: BackoffConfig::default(),
            restart_reset_after: default_restart_reset_after(),
            event_queue_capacity: default_event_queue_capacity(),
            base_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network bind address (e.g. "0.0.0.0" or "127.0.0.1")
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// HTTP API port
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_api_port(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

// Default value functions
fn default_connect_timeout() -> u64 {
    120
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_initial_delay() -> Duration {
    Duration::from_millis(200)
}

fn default_retry_max_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_restart_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_restart_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_container_prefix() -> String {
    "marshal".to_string()
}

fn default_driver_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_restart_reset_after() -> Duration {
    Duration::from_secs(600)
}

fn default_event_queue_capacity() -> usize {
    256
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for NodeConfigManifest {
    fn default() -> Self {
        let name = std::env::var("HOSTNAME")
            .ok()
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "marshal-node".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata { name, labels: None },
            spec: NodeConfigSpec::default(),
        }
    }
}

impl NodeConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. MARSHAL_CONFIG_PATH environment variable
    /// 2. ./marshal-config.yaml (working directory)
    /// 3. ~/.marshal/config.yaml (user home)
    /// 4. /etc/marshal/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("MARSHAL_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./marshal-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".marshal").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/marshal/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path fails if missing or invalid
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("MARSHAL_DOCKER_SOCKET") {
            if !val.is_empty() {
                tracing::info!("Environment override: MARSHAL_DOCKER_SOCKET={}", val);
                self.spec.docker.socket_path = Some(val);
            }
        }

        if let Ok(val) = std::env::var("MARSHAL_CONTAINER_PREFIX") {
            if val.is_empty() {
                tracing::warn!("Empty value for MARSHAL_CONTAINER_PREFIX. Ignoring.");
            } else {
                tracing::info!("Environment override: MARSHAL_CONTAINER_PREFIX={}", val);
                self.spec.orchestration.container_prefix = val;
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let orchestration = &self.spec.orchestration;
        if orchestration.container_prefix.is_empty() {
            anyhow::bail!("spec.orchestration.container_prefix cannot be empty");
        }
        if orchestration.driver_timeout.is_zero() {
            anyhow::bail!("spec.orchestration.driver_timeout must be greater than zero");
        }
        if orchestration.driver_retry.attempts == 0 {
            anyhow::bail!("spec.orchestration.driver_retry.attempts must be at least 1");
        }
        if orchestration.driver_retry.initial_delay > orchestration.driver_retry.max_delay {
            anyhow::bail!("spec.orchestration.driver_retry.initial_delay exceeds max_delay");
        }
        if orchestration.restart_backoff.initial_delay > orchestration.restart_backoff.max_delay {
            anyhow::bail!("spec.orchestration.restart_backoff.initial_delay exceeds max_delay");
        }
        if orchestration.event_queue_capacity == 0 {
            anyhow::bail!("spec.orchestration.event_queue_capacity must be at least 1");
        }

        match self.spec.observability.logging.format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("Invalid logging format: '{}'. Expected json or text", other),
        }

        Ok(())
    }
}
