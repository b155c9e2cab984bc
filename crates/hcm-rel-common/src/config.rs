//! ---
//! hcm_section: "01-core-functionality"
//! hcm_subsection: "module"
//! hcm_type: "source"
//! hcm_scope: "code"
//! hcm_description: "Shared primitives and utilities for the reliability harness."
//! hcm_version: "v0.1.0"
//! hcm_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;
use url::Url;

use crate::logging::{LogFormat, LogRotation};

fn default_runtime_enabled() -> bool {
    true
}

fn default_runtime_endpoint() -> Url {
    Url::parse("http://localhost:2375").expect("valid default runtime endpoint")
}

fn default_gateway_base() -> Url {
    Url::parse("http://localhost:3001").expect("valid default gateway address")
}

fn default_monitor_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_recovery_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_recovery_max_wait() -> Duration {
    Duration::from_secs(60)
}

fn default_baseline() -> Duration {
    Duration::from_secs(300)
}

fn default_observation() -> Duration {
    Duration::from_secs(300)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_log_file() -> bool {
    true
}

fn default_metrics_enabled() -> bool {
    false
}

fn default_metrics_listen() -> SocketAddr {
    "0.0.0.0:9899"
        .parse()
        .expect("valid default metrics address")
}

/// Primary configuration object for the reliability harness.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub campaign: CampaignConfig,
    /// Services under test. When empty the built-in HCM table is used.
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    /// `None` when no candidate existed and built-in defaults were used.
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "HCM_REL_CONFIG";

    /// Load configuration from disk, respecting the `HCM_REL_CONFIG` override.
    ///
    /// Unlike a daemon, the harness is usable without any file: when no
    /// candidate exists the defaults are returned.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        debug!(
            inspected = %candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            "no configuration file found; using defaults"
        );
        Ok(LoadedAppConfig {
            config: AppConfig::default(),
            source: None,
        })
    }

    /// Read and validate a configuration file.
    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.monitor.validate()?;
        self.recovery.validate()?;
        self.logging.validate()?;

        let mut seen = HashSet::new();
        for service in &self.services {
            if !seen.insert(service.name.as_str()) {
                return Err(anyhow!("service '{}' declared more than once", service.name));
            }
            service.validate()?;
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Container runtime connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_runtime_enabled")]
    pub enabled: bool,
    /// Docker Engine API base address.
    #[serde(default = "default_runtime_endpoint")]
    pub endpoint: Url,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            enabled: default_runtime_enabled(),
            endpoint: default_runtime_endpoint(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_monitor_interval", rename = "interval_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub interval: Duration,
    #[serde(default = "default_probe_timeout", rename = "probe_timeout_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub probe_timeout: Duration,
    /// Base address of the API gateway used by the built-in service table.
    #[serde(default = "default_gateway_base")]
    pub gateway_base: Url,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: default_monitor_interval(),
            probe_timeout: default_probe_timeout(),
            gateway_base: default_gateway_base(),
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(anyhow!("monitor.interval_secs must be greater than zero"));
        }
        if self.probe_timeout.is_zero() {
            return Err(anyhow!("monitor.probe_timeout_secs must be greater than zero"));
        }
        Ok(())
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default = "default_recovery_poll_interval", rename = "poll_interval_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub poll_interval: Duration,
    #[serde(default = "default_recovery_max_wait", rename = "max_wait_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub max_wait: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_recovery_poll_interval(),
            max_wait: default_recovery_max_wait(),
        }
    }
}

impl RecoveryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(anyhow!("recovery.poll_interval_secs must be greater than zero"));
        }
        if self.max_wait < self.poll_interval {
            return Err(anyhow!(
                "recovery.max_wait_secs ({}) must not be shorter than the poll interval ({})",
                self.max_wait.as_secs(),
                self.poll_interval.as_secs()
            ));
        }
        Ok(())
    }
}

/// Phase lengths for the fault-tolerance campaign.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignConfig {
    #[serde(default = "default_baseline", rename = "baseline_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub baseline: Duration,
    #[serde(default = "default_observation", rename = "observation_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub observation: Duration,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            baseline: default_baseline(),
            observation: default_observation(),
        }
    }
}

/// How a configured service exposes its health.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Http,
    Container,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub kind: ServiceKind,
    #[serde(default)]
    pub endpoint: Option<Url>,
    /// Backing container; defaults to the service name.
    #[serde(default)]
    pub container: Option<String>,
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow!("service name must not be empty"));
        }
        if self.kind == ServiceKind::Http && self.endpoint.is_none() {
            return Err(anyhow!(
                "http service '{}' must declare an endpoint",
                self.name
            ));
        }
        Ok(())
    }

    pub fn container_name(&self) -> &str {
        self.container.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    /// Filter used when neither `HCM_REL_LOG` nor `RUST_LOG` is set.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Write a JSON log file next to stdout output.
    #[serde(default = "default_log_file")]
    pub file: bool,
    #[serde(default)]
    pub rotation: LogRotation,
    /// Replaces the binary name at the start of log file names.
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.level.trim().is_empty() {
            return Err(anyhow!("logging.level must not be empty"));
        }
        if let Some(prefix) = &self.file_prefix {
            if prefix.trim().is_empty() || prefix.contains(|c: char| c == '/' || c == '\\') {
                return Err(anyhow!("logging.file_prefix '{}' is not a valid file name", prefix));
            }
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            level: default_log_level(),
            file: default_log_file(),
            rotation: LogRotation::default(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}
