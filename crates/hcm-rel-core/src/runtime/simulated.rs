//! ---
//! hcm_section: "02-monitoring-engine"
//! hcm_subsection: "module"
//! hcm_type: "source"
//! hcm_scope: "code"
//! hcm_description: "Container runtime access used for probing and fault injection."
//! hcm_version: "v0.1.0"
//! hcm_owner: "tbd"
//! ---
//! In-process runtime used for dry runs and tests.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{ContainerRuntime, ContainerState, ContainerStats, RuntimeError};

/// What happens when `start` is called on a simulated container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartBehaviour {
    /// The container is running as soon as `start` returns.
    #[default]
    Immediate,
    /// `start` succeeds but the container never reaches the running state.
    Stuck,
    /// `start` is rejected by the runtime.
    Rejected,
}

#[derive(Debug, Clone, Default)]
struct SimulatedContainer {
    running: bool,
    stats: Option<ContainerStats>,
    start_behaviour: StartBehaviour,
    latency: Duration,
    stops: u32,
    starts: u32,
}

/// Container runtime backed by an in-memory table.
#[derive(Debug, Default)]
pub struct SimulatedRuntime {
    containers: Mutex<HashMap<String, SimulatedContainer>>,
}

impl SimulatedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_container(self, name: impl Into<String>, running: bool) -> Self {
        self.insert(name, running);
        self
    }

    pub fn insert(&self, name: impl Into<String>, running: bool) {
        self.containers.lock().insert(
            name.into(),
            SimulatedContainer {
                running,
                ..SimulatedContainer::default()
            },
        );
    }

    /// Stats returned by [`ContainerRuntime::stats`]; without them the call fails.
    pub fn set_stats(&self, name: &str, stats: ContainerStats) {
        if let Some(container) = self.containers.lock().get_mut(name) {
            container.stats = Some(stats);
        }
    }

    pub fn set_start_behaviour(&self, name: &str, behaviour: StartBehaviour) {
        if let Some(container) = self.containers.lock().get_mut(name) {
            container.start_behaviour = behaviour;
        }
    }

    /// Delay applied to `state` and `start` calls for `name`.
    pub fn set_latency(&self, name: &str, latency: Duration) {
        if let Some(container) = self.containers.lock().get_mut(name) {
            container.latency = latency;
        }
    }

    pub fn is_running(&self, name: &str) -> Option<bool> {
        self.containers.lock().get(name).map(|c| c.running)
    }

    /// Number of `(stop, start)` calls received for `name`.
    pub fn call_counts(&self, name: &str) -> (u32, u32) {
        self.containers
            .lock()
            .get(name)
            .map(|c| (c.stops, c.starts))
            .unwrap_or_default()
    }

    fn with_existing<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut SimulatedContainer) -> Result<T, RuntimeError>,
    ) -> Result<T, RuntimeError> {
        let mut containers = self.containers.lock();
        let container = containers
            .get_mut(name)
            .ok_or_else(|| RuntimeError::NotFound(name.to_owned()))?;
        f(container)
    }

    async fn delay(&self, name: &str) {
        let latency = self
            .containers
            .lock()
            .get(name)
            .map(|c| c.latency)
            .unwrap_or_default();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ContainerRuntime for SimulatedRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn state(&self, container: &str) -> Result<ContainerState, RuntimeError> {
        self.delay(container).await;
        self.with_existing(container, |c| {
            Ok(ContainerState {
                running: c.running,
                status: if c.running { "running" } else { "exited" }.to_owned(),
            })
        })
    }

    async fn stop(&self, container: &str) -> Result<(), RuntimeError> {
        self.with_existing(container, |c| {
            c.stops += 1;
            c.running = false;
            Ok(())
        })
    }

    async fn start(&self, container: &str) -> Result<(), RuntimeError> {
        self.delay(container).await;
        self.with_existing(container, |c| {
            c.starts += 1;
            match c.start_behaviour {
                StartBehaviour::Immediate => {
                    c.running = true;
                    Ok(())
                }
                StartBehaviour::Stuck => Ok(()),
                StartBehaviour::Rejected => Err(RuntimeError::Api {
                    container: container.to_owned(),
                    status: 500,
                    message: "simulated start failure".to_owned(),
                }),
            }
        })
    }

    async fn stats(&self, container: &str) -> Result<ContainerStats, RuntimeError> {
        self.with_existing(container, |c| {
            c.stats.ok_or_else(|| RuntimeError::Api {
                container: container.to_owned(),
                status: 500,
                message: "no stats recorded".to_owned(),
            })
        })
    }
}
