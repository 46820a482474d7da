//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use crate::domain::source::{
    SourceConfig, SourceType, DEFAULT_INTERVAL_MS, DEFAULT_SHEET_NAME,
};
use crate::services::engine::DisconnectPolicy;
use crate::services::normalizer::FieldAliases;
use crate::services::reconciler::AbsentPolicy;
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct SourceSection {
    #[serde(rename = "type")]
    pub source_type: SourceType,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_sheet_name")]
    pub sheet_name: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Workbook path for fileUpload sources
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_sheet_name() -> String {
    DEFAULT_SHEET_NAME.to_string()
}

fn default_interval_ms() -> u64 {
    DEFAULT_INTERVAL_MS
}

impl Default for SourceSection {
    fn default() -> Self {
        Self {
            source_type: SourceType::MockData,
            endpoint: String::new(),
            sheet_name: default_sheet_name(),
            api_key: None,
            interval_ms: default_interval_ms(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FleetSection {
    /// Placeholder vehicles created at engine start
    #[serde(default = "default_seed_vehicles")]
    pub seed_vehicles: u32,
    /// Highest vehicle id accepted from a source
    #[serde(default = "default_max_vehicles")]
    pub max_vehicles: u32,
    #[serde(default)]
    pub absent_policy: AbsentPolicy,
    #[serde(default)]
    pub disconnect_policy: DisconnectPolicy,
}

fn default_seed_vehicles() -> u32 {
    57
}

fn default_max_vehicles() -> u32 {
    10_000
}

impl Default for FleetSection {
    fn default() -> Self {
        Self {
            seed_vehicles: default_seed_vehicles(),
            max_vehicles: default_max_vehicles(),
            absent_policy: AbsentPolicy::default(),
            disconnect_policy: DisconnectPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MockSection {
    #[serde(default = "default_mock_rows")]
    pub rows: u32,
    /// Artificial latency so the loading state is visible
    #[serde(default = "default_mock_delay_ms")]
    pub delay_ms: u64,
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_mock_rows() -> u32 {
    57
}

fn default_mock_delay_ms() -> u64 {
    800
}

impl Default for MockSection {
    fn default() -> Self {
        Self { rows: default_mock_rows(), delay_ms: default_mock_delay_ms(), seed: None }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct HttpSection {
    /// Request timeout for source fetches (0 = no timeout)
    #[serde(default)]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

fn default_metrics_interval() -> u64 {
    10
}

fn default_prometheus_port() -> u16 {
    9464
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval(), prometheus_port: default_prometheus_port() }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SiteConfig {
    /// Depot identifier used as the metrics label
    #[serde(default = "default_site_id")]
    pub id: String,
}

fn default_site_id() -> String {
    "fleet".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    pub source: SourceSection,
    #[serde(default)]
    pub fleet: FleetSection,
    #[serde(default)]
    pub mock: MockSection,
    #[serde(default)]
    pub http: HttpSection,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub aliases: FieldAliases,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    source_type: SourceType,
    source_endpoint: String,
    source_sheet_name: String,
    source_api_key: Option<String>,
    source_interval_ms: u64,
    source_file: Option<PathBuf>,
    seed_vehicles: u32,
    max_vehicles: u32,
    absent_policy: AbsentPolicy,
    disconnect_policy: DisconnectPolicy,
    mock_rows: u32,
    mock_delay_ms: u64,
    mock_seed: Option<u64>,
    http_timeout_ms: u64,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    aliases: FieldAliases,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_id: default_site_id(),
            source_type: SourceType::MockData,
            source_endpoint: String::new(),
            source_sheet_name: default_sheet_name(),
            source_api_key: None,
            source_interval_ms: default_interval_ms(),
            source_file: None,
            seed_vehicles: default_seed_vehicles(),
            max_vehicles: default_max_vehicles(),
            absent_policy: AbsentPolicy::default(),
            disconnect_policy: DisconnectPolicy::default(),
            mock_rows: default_mock_rows(),
            mock_delay_ms: default_mock_delay_ms(),
            mock_seed: None,
            http_timeout_ms: 0,
            metrics_interval_secs: default_metrics_interval(),
            prometheus_port: default_prometheus_port(),
            aliases: FieldAliases::default(),
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            site_id: toml_config.site.id,
            source_type: toml_config.source.source_type,
            source_endpoint: toml_config.source.endpoint,
            source_sheet_name: toml_config.source.sheet_name,
            source_api_key: toml_config.source.api_key,
            source_interval_ms: toml_config.source.interval_ms,
            source_file: toml_config.source.file,
            seed_vehicles: toml_config.fleet.seed_vehicles,
            max_vehicles: toml_config.fleet.max_vehicles,
            absent_policy: toml_config.fleet.absent_policy,
            disconnect_policy: toml_config.fleet.disconnect_policy,
            mock_rows: toml_config.mock.rows,
            mock_delay_ms: toml_config.mock.delay_ms,
            mock_seed: toml_config.mock.seed,
            http_timeout_ms: toml_config.http.timeout_ms,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            aliases: toml_config.aliases,
            config_file,
        }
    }

    /// Load configuration from a path, falling back to defaults
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        match Self::from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    /// Load from `--config`, then CONFIG_FILE, then config/dev.toml,
    /// falling back to defaults
    pub fn load(args: &[String]) -> Self {
        Self::load_from_path(Self::resolve_config_path(args))
    }

    /// Source settings for a connect intent
    pub fn source_config(&self) -> SourceConfig {
        SourceConfig {
            source_type: self.source_type,
            endpoint_or_id: self.source_endpoint.clone(),
            sheet_name: self.source_sheet_name.clone(),
            api_key: self.source_api_key.clone(),
            interval_ms: self.source_interval_ms,
        }
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn source_type(&self) -> SourceType {
        self.source_type
    }

    pub fn source_endpoint(&self) -> &str {
        &self.source_endpoint
    }

    pub fn source_interval_ms(&self) -> u64 {
        self.source_interval_ms
    }

    pub fn source_file(&self) -> Option<&Path> {
        self.source_file.as_deref()
    }

    pub fn seed_vehicles(&self) -> u32 {
        self.seed_vehicles
    }

    pub fn max_vehicles(&self) -> u32 {
        self.max_vehicles
    }

    pub fn absent_policy(&self) -> AbsentPolicy {
        self.absent_policy
    }

    pub fn disconnect_policy(&self) -> DisconnectPolicy {
        self.disconnect_policy
    }

    pub fn mock_rows(&self) -> u32 {
        self.mock_rows
    }

    pub fn mock_delay_ms(&self) -> u64 {
        self.mock_delay_ms
    }

    pub fn mock_seed(&self) -> Option<u64> {
        self.mock_seed
    }

    pub fn http_timeout_ms(&self) -> u64 {
        self.http_timeout_ms
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn aliases(&self) -> &FieldAliases {
        &self.aliases
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to pick a source
    #[cfg(test)]
    pub fn with_source(mut self, source_type: SourceType, endpoint: &str) -> Self {
        self.source_type = source_type;
        self.source_endpoint = endpoint.to_string();
        self
    }
}
