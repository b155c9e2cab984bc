//! ---
//! hcm_section: "02-monitoring-engine"
//! hcm_subsection: "module"
//! hcm_type: "source"
//! hcm_scope: "code"
//! hcm_description: "Health probing, monitoring and reliability reporting."
//! hcm_version: "v0.1.0"
//! hcm_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::{Context, Result};
use hcm_rel_common::config::{AppConfig, RuntimeConfig};
use hcm_rel_metrics::{MonitorMetrics, SharedRegistry};
use tracing::{info, warn};

use crate::log::MetricLog;
use crate::monitor::MonitorLoop;
use crate::probe::HealthProbe;
use crate::registry::ServiceRegistry;
use crate::runtime::{ContainerRuntime, DockerEngine, DynContainerRuntime};

/// Connect to the configured container runtime.
///
/// Returns `None` when the runtime is disabled or does not answer its ping;
/// the harness then runs without container access.
pub async fn connect_runtime(config: &RuntimeConfig) -> Option<DynContainerRuntime> {
    if !config.enabled {
        info!("container runtime disabled by configuration");
        return None;
    }
    let engine = match DockerEngine::new(config.endpoint.clone()) {
        Ok(engine) => engine,
        Err(err) => {
            warn!(endpoint = %config.endpoint, error = %err, "failed to build container runtime client");
            return None;
        }
    };
    match engine.ping().await {
        Ok(()) => {
            info!(endpoint = %config.endpoint, "container runtime connected");
            Some(Arc::new(engine))
        }
        Err(err) => {
            warn!(
                endpoint = %config.endpoint,
                error = %err,
                "container runtime unavailable; infrastructure checks will fail"
            );
            None
        }
    }
}

/// Wired monitoring stack: registry, optional runtime and the loop that
/// feeds the shared metric log.
#[derive(Debug, Clone)]
pub struct Harness {
    registry: Arc<ServiceRegistry>,
    runtime: Option<DynContainerRuntime>,
    monitor: MonitorLoop,
}

impl Harness {
    /// Assemble the harness from configuration, connecting to the runtime if possible.
    pub async fn from_config(config: &AppConfig, metrics: Option<SharedRegistry>) -> Result<Self> {
        let runtime = connect_runtime(&config.runtime).await;
        Self::with_runtime(config, runtime, metrics)
    }

    /// Assemble the harness around an already chosen runtime.
    pub fn with_runtime(
        config: &AppConfig,
        runtime: Option<DynContainerRuntime>,
        metrics: Option<SharedRegistry>,
    ) -> Result<Self> {
        let registry = Arc::new(
            ServiceRegistry::from_app_config(config).context("failed to build service registry")?,
        );
        let probe = HealthProbe::new(runtime.clone(), config.monitor.probe_timeout)
            .context("failed to build health probe client")?;
        let monitor_metrics = match metrics {
            Some(registry) => Some(
                MonitorMetrics::new(registry).context("failed to register monitor metrics")?,
            ),
            None => None,
        };
        let monitor = MonitorLoop::new(
            registry.clone(),
            probe,
            MetricLog::new(),
            config.monitor.interval,
            monitor_metrics,
        );
        let infrastructure = registry
            .iter()
            .filter(|service| service.is_infrastructure())
            .count();
        if runtime.is_none() && infrastructure > 0 {
            warn!(infrastructure, "container-checked services will report failed without a runtime");
        }
        info!(
            services = registry.len(),
            infrastructure,
            runtime = runtime.is_some(),
            "harness assembled"
        );
        Ok(Self {
            registry,
            runtime,
            monitor,
        })
    }

    pub fn registry(&self) -> Arc<ServiceRegistry> {
        self.registry.clone()
    }

    pub fn runtime(&self) -> Option<DynContainerRuntime> {
        self.runtime.clone()
    }

    pub fn monitor(&self) -> &MonitorLoop {
        &self.monitor
    }

    pub fn log(&self) -> &MetricLog {
        self.monitor.log()
    }
}
