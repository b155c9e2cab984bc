//! ---
//! hcm_section: "02-monitoring-engine"
//! hcm_subsection: "module"
//! hcm_type: "source"
//! hcm_scope: "code"
//! hcm_description: "Container runtime access used for probing and fault injection."
//! hcm_version: "v0.1.0"
//! hcm_owner: "tbd"
//! ---
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod docker;
mod simulated;

pub use docker::DockerEngine;
pub use simulated::{SimulatedRuntime, StartBehaviour};

/// Shared handle to a runtime implementation.
pub type DynContainerRuntime = Arc<dyn ContainerRuntime>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("container '{0}' not found")]
    NotFound(String),
    #[error("runtime rejected request for '{container}' with status {status}: {message}")]
    Api {
        container: String,
        status: u16,
        message: String,
    },
    #[error("runtime request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid runtime address: {0}")]
    Address(#[from] url::ParseError),
    #[error("runtime call timed out after {0:?}")]
    Timeout(Duration),
}

/// Running/stopped state as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerState {
    pub running: bool,
    /// Runtime status word (`running`, `exited`, `restarting`, ...).
    pub status: String,
}

/// Cumulative CPU counters for two consecutive reads plus memory usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStats {
    pub cpu_total_usage: u64,
    pub precpu_total_usage: u64,
    pub system_cpu_usage: u64,
    pub presystem_cpu_usage: u64,
    pub memory_usage: u64,
    pub memory_limit: u64,
}

/// Operations the harness needs from a container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync + Debug {
    /// Cheap liveness check of the runtime itself.
    async fn ping(&self) -> Result<(), RuntimeError>;

    async fn state(&self, container: &str) -> Result<ContainerState, RuntimeError>;

    async fn stop(&self, container: &str) -> Result<(), RuntimeError>;

    async fn start(&self, container: &str) -> Result<(), RuntimeError>;

    async fn stats(&self, container: &str) -> Result<ContainerStats, RuntimeError>;
}
