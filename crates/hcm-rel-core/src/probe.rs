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
use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;
use url::Url;

use crate::inspector::ContainerInspector;
use crate::model::{ResourceUsage, ServiceMetric, ServiceStatus};
use crate::registry::{HealthSurface, ServiceDefinition};
use crate::runtime::DynContainerRuntime;

/// Why a probe did not observe a healthy service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeFailure {
    #[error("health check timed out after {0:?}")]
    Timeout(Duration),
    #[error("health request failed: {0}")]
    Transport(String),
    #[error("health endpoint answered {0}")]
    UnexpectedStatus(u16),
    #[error("no container runtime available")]
    RuntimeUnavailable,
    #[error("runtime query failed: {0}")]
    Runtime(String),
    #[error("container is not running (status: {0})")]
    NotRunning(String),
}

/// Result of one probe: always carries a sample, plus the cause when the
/// sample is not healthy.
#[derive(Debug, Clone)]
pub enum ProbeOutcome {
    Sample(ServiceMetric),
    Classified {
        sample: ServiceMetric,
        cause: ProbeFailure,
    },
}

impl ProbeOutcome {
    fn classify(sample: ServiceMetric, cause: Option<ProbeFailure>) -> Self {
        match cause {
            None => ProbeOutcome::Sample(sample),
            Some(cause) => ProbeOutcome::Classified { sample, cause },
        }
    }

    pub fn sample(&self) -> &ServiceMetric {
        match self {
            ProbeOutcome::Sample(sample) | ProbeOutcome::Classified { sample, .. } => sample,
        }
    }

    pub fn into_sample(self) -> ServiceMetric {
        match self {
            ProbeOutcome::Sample(sample) | ProbeOutcome::Classified { sample, .. } => sample,
        }
    }

    pub fn failure(&self) -> Option<&ProbeFailure> {
        match self {
            ProbeOutcome::Sample(_) => None,
            ProbeOutcome::Classified { cause, .. } => Some(cause),
        }
    }
}

/// Executes a single bounded health check for one service.
#[derive(Debug, Clone)]
pub struct HealthProbe {
    client: Client,
    runtime: Option<DynContainerRuntime>,
    inspector: Arc<ContainerInspector>,
    timeout: Duration,
}

impl HealthProbe {
    /// Build a probe whose HTTP and runtime calls are bounded by `timeout`.
    pub fn new(runtime: Option<DynContainerRuntime>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        let inspector = Arc::new(ContainerInspector::new(runtime.clone(), timeout));
        Ok(Self {
            client,
            runtime,
            inspector,
            timeout,
        })
    }

    pub async fn check(&self, service: &ServiceDefinition) -> ProbeOutcome {
        let outcome = match &service.surface {
            HealthSurface::HttpChecked(endpoint) => self.check_http(service, endpoint).await,
            HealthSurface::ContainerChecked(container) => {
                self.check_container(service, container).await
            }
        };
        let sample = outcome.sample();
        debug!(
            service = %sample.service_name,
            status = %sample.status,
            response_time_ms = sample.response_time_ms,
            cause = ?outcome.failure(),
            "probe complete"
        );
        outcome
    }

    async fn check_http(&self, service: &ServiceDefinition, endpoint: &Url) -> ProbeOutcome {
        let started = Instant::now();
        let result = self.client.get(endpoint.clone()).send().await;
        let response_time_ms = started.elapsed().as_secs_f64() * 1000.0;

        let (status, cause) = match result {
            Ok(response) if response.status() == StatusCode::OK => (ServiceStatus::Healthy, None),
            Ok(response) => (
                ServiceStatus::Degraded,
                Some(ProbeFailure::UnexpectedStatus(response.status().as_u16())),
            ),
            Err(err) if err.is_timeout() => {
                (ServiceStatus::Failed, Some(ProbeFailure::Timeout(self.timeout)))
            }
            Err(err) => (ServiceStatus::Failed, Some(ProbeFailure::Transport(err.to_string()))),
        };

        let usage = match service.container_name() {
            Some(container) => self.inspector.inspect(container).await,
            None => ResourceUsage::default(),
        };
        ProbeOutcome::classify(
            ServiceMetric::new(&service.name, status, response_time_ms, usage),
            cause,
        )
    }

    /// Runtime-state check for services without an HTTP surface. Response
    /// time is not measured for these and stays at zero.
    async fn check_container(&self, service: &ServiceDefinition, container: &str) -> ProbeOutcome {
        let Some(runtime) = &self.runtime else {
            return ProbeOutcome::classify(
                ServiceMetric::new(&service.name, ServiceStatus::Failed, 0.0, ResourceUsage::default()),
                Some(ProbeFailure::RuntimeUnavailable),
            );
        };

        let (status, cause) = match timeout(self.timeout, runtime.state(container)).await {
            Ok(Ok(state)) if state.running => (ServiceStatus::Healthy, None),
            Ok(Ok(state)) => (ServiceStatus::Failed, Some(ProbeFailure::NotRunning(state.status))),
            Ok(Err(err)) => {
                return ProbeOutcome::classify(
                    ServiceMetric::new(&service.name, ServiceStatus::Failed, 0.0, ResourceUsage::default()),
                    Some(ProbeFailure::Runtime(err.to_string())),
                );
            }
            Err(_) => {
                return ProbeOutcome::classify(
                    ServiceMetric::new(&service.name, ServiceStatus::Failed, 0.0, ResourceUsage::default()),
                    Some(ProbeFailure::Timeout(self.timeout)),
                );
            }
        };

        let usage = self.inspector.inspect(container).await;
        ProbeOutcome::classify(ServiceMetric::new(&service.name, status, 0.0, usage), cause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::SimulatedRuntime;

    #[tokio::test]
    async fn running_container_is_healthy_without_latency() {
        let runtime = Arc::new(SimulatedRuntime::new().with_container("hcm-redis", true));
        let probe = HealthProbe::new(Some(runtime), Duration::from_secs(1)).unwrap();
        let outcome = probe
            .check(&ServiceDefinition::container("hcm-redis", "hcm-redis"))
            .await;
        assert!(outcome.failure().is_none());
        let sample = outcome.sample();
        assert_eq!(sample.status, ServiceStatus::Healthy);
        assert_eq!(sample.response_time_ms, 0.0);
        assert_eq!(sample.availability, 1.0);
    }

    #[tokio::test]
    async fn stopped_container_is_failed() {
        let runtime = Arc::new(SimulatedRuntime::new().with_container("neo4j", false));
        let probe = HealthProbe::new(Some(runtime), Duration::from_secs(1)).unwrap();
        let outcome = probe
            .check(&ServiceDefinition::container("neo4j", "neo4j"))
            .await;
        assert_eq!(
            outcome.failure(),
            Some(&ProbeFailure::NotRunning("exited".into()))
        );
        let sample = outcome.into_sample();
        assert_eq!(sample.status, ServiceStatus::Failed);
        assert_eq!(sample.error_rate_pct, 100.0);
    }

    #[tokio::test]
    async fn missing_runtime_fails_infrastructure_checks() {
        let probe = HealthProbe::new(None, Duration::from_secs(1)).unwrap();
        let outcome = probe
            .check(&ServiceDefinition::container("hcm-postgres", "hcm-postgres"))
            .await;
        assert_eq!(outcome.failure(), Some(&ProbeFailure::RuntimeUnavailable));
        let sample = outcome.sample();
        assert_eq!(sample.availability, 0.0);
        assert_eq!(sample.cpu_pct, 0.0);
        assert_eq!(sample.memory_pct, 0.0);
    }

    #[tokio::test]
    async fn unknown_container_is_a_runtime_failure() {
        let runtime = Arc::new(SimulatedRuntime::new());
        let probe = HealthProbe::new(Some(runtime), Duration::from_secs(1)).unwrap();
        let outcome = probe
            .check(&ServiceDefinition::container("hcm-redis", "hcm-redis"))
            .await;
        assert!(matches!(outcome.failure(), Some(ProbeFailure::Runtime(_))));
        assert_eq!(outcome.sample().status, ServiceStatus::Failed);
    }
}
