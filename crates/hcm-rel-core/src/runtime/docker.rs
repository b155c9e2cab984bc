//! ---
//! hcm_section: "02-monitoring-engine"
//! hcm_subsection: "module"
//! hcm_type: "source"
//! hcm_scope: "code"
//! hcm_description: "Container runtime access used for probing and fault injection."
//! hcm_version: "v0.1.0"
//! hcm_owner: "tbd"
//! ---
//! Docker Engine REST client covering the handful of endpoints the harness uses.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::{ContainerRuntime, ContainerState, ContainerStats, RuntimeError};

/// Upper bound for a single runtime call. `stop` waits for the engine's own
/// grace period (10 s by default) before returning.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct DockerEngine {
    client: Client,
    base: Url,
}

impl DockerEngine {
    /// Client for the engine listening at `base` (e.g. `http://localhost:2375`).
    pub fn new(base: Url) -> Result<Self, RuntimeError> {
        let client = Client::builder().timeout(DEFAULT_REQUEST_TIMEOUT).build()?;
        Ok(Self::with_client(base, client))
    }

    pub fn with_client(mut base: Url, client: Client) -> Self {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self { client, base }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, RuntimeError> {
        Ok(self.base.join(path)?)
    }
}

#[async_trait]
impl ContainerRuntime for DockerEngine {
    async fn ping(&self) -> Result<(), RuntimeError> {
        let response = self.client.get(self.endpoint("_ping")?).send().await?;
        check(response, "_ping").await?;
        Ok(())
    }

    async fn state(&self, container: &str) -> Result<ContainerState, RuntimeError> {
        let url = self.endpoint(&format!("containers/{}/json", container))?;
        let response = check(self.client.get(url).send().await?, container).await?;
        let inspect: InspectResponse = response.json().await?;
        Ok(ContainerState {
            running: inspect.state.running,
            status: inspect.state.status,
        })
    }

    async fn stop(&self, container: &str) -> Result<(), RuntimeError> {
        let url = self.endpoint(&format!("containers/{}/stop", container))?;
        let response = check(self.client.post(url).send().await?, container).await?;
        debug!(container, status = response.status().as_u16(), "container stop acknowledged");
        Ok(())
    }

    async fn start(&self, container: &str) -> Result<(), RuntimeError> {
        let url = self.endpoint(&format!("containers/{}/start", container))?;
        let response = check(self.client.post(url).send().await?, container).await?;
        debug!(container, status = response.status().as_u16(), "container start acknowledged");
        Ok(())
    }

    async fn stats(&self, container: &str) -> Result<ContainerStats, RuntimeError> {
        let mut url = self.endpoint(&format!("containers/{}/stats", container))?;
        url.query_pairs_mut().append_pair("stream", "false");
        let response = check(self.client.get(url).send().await?, container).await?;
        let stats: StatsResponse = response.json().await?;
        Ok(ContainerStats {
            cpu_total_usage: stats.cpu_stats.cpu_usage.total_usage,
            precpu_total_usage: stats.precpu_stats.cpu_usage.total_usage,
            system_cpu_usage: stats.cpu_stats.system_cpu_usage.unwrap_or(0),
            presystem_cpu_usage: stats.precpu_stats.system_cpu_usage.unwrap_or(0),
            memory_usage: stats.memory_stats.usage.unwrap_or(0),
            memory_limit: stats.memory_stats.limit.unwrap_or(0),
        })
    }
}

/// Map non-success statuses to [`RuntimeError`]. `304 Not Modified` is what the
/// engine answers when a container is already in the requested state.
async fn check(response: Response, container: &str) -> Result<Response, RuntimeError> {
    let status = response.status();
    if status.is_success() || status == StatusCode::NOT_MODIFIED {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(RuntimeError::NotFound(container.to_owned()));
    }
    let message = match response.json::<ApiMessage>().await {
        Ok(body) => body.message,
        Err(_) => status.canonical_reason().unwrap_or("unknown").to_owned(),
    };
    Err(RuntimeError::Api {
        container: container.to_owned(),
        status: status.as_u16(),
        message,
    })
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    message: String,
}

#[derive(Debug, Deserialize)]
struct InspectResponse {
    #[serde(rename = "State")]
    state: InspectState,
}

#[derive(Debug, Deserialize)]
struct InspectState {
    #[serde(rename = "Status", default)]
    status: String,
    #[serde(rename = "Running", default)]
    running: bool,
}

#[derive(Debug, Default, Deserialize)]
struct StatsResponse {
    #[serde(default)]
    cpu_stats: CpuStats,
    #[serde(default)]
    precpu_stats: CpuStats,
    #[serde(default)]
    memory_stats: MemoryStats,
}

#[derive(Debug, Default, Deserialize)]
struct CpuStats {
    #[serde(default)]
    cpu_usage: CpuUsage,
    #[serde(default)]
    system_cpu_usage: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CpuUsage {
    #[serde(default)]
    total_usage: u64,
}

#[derive(Debug, Default, Deserialize)]
struct MemoryStats {
    #[serde(default)]
    usage: Option<u64>,
    #[serde(default)]
    limit: Option<u64>,
}
