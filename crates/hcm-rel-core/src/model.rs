//! ---
//! hcm_section: "02-monitoring-engine"
//! hcm_subsection: "module"
//! hcm_type: "source"
//! hcm_scope: "code"
//! hcm_description: "Health probing, monitoring and reliability reporting."
//! hcm_version: "v0.1.0"
//! hcm_owner: "tbd"
//! ---
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health classification of a single sample.
///
/// Computed independently for every probe; there is no transition guard
/// between consecutive samples of the same service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Healthy,
    Degraded,
    Failed,
    Recovering,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Healthy => "healthy",
            ServiceStatus::Degraded => "degraded",
            ServiceStatus::Failed => "failed",
            ServiceStatus::Recovering => "recovering",
        }
    }

    /// Availability credited to a sample carrying this status.
    pub fn availability(&self) -> f64 {
        match self {
            ServiceStatus::Healthy => 1.0,
            ServiceStatus::Degraded | ServiceStatus::Recovering => 0.5,
            ServiceStatus::Failed => 0.0,
        }
    }

    pub fn error_rate_pct(&self) -> f64 {
        100.0 * (1.0 - self.availability())
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time CPU and memory utilisation of a container, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_pct: f64,
    pub memory_pct: f64,
}

impl ResourceUsage {
    /// Build a usage value with both figures clamped to `[0, 100]`.
    pub fn clamped(cpu_pct: f64, memory_pct: f64) -> Self {
        Self {
            cpu_pct: clamp_pct(cpu_pct),
            memory_pct: clamp_pct(memory_pct),
        }
    }
}

fn clamp_pct(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

/// One immutable health observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceMetric {
    pub timestamp: DateTime<Utc>,
    pub service_name: String,
    pub status: ServiceStatus,
    /// Round-trip time of the health request; `0` when not measured.
    pub response_time_ms: f64,
    pub cpu_pct: f64,
    pub memory_pct: f64,
    pub error_rate_pct: f64,
    pub availability: f64,
}

impl ServiceMetric {
    /// Create a sample stamped with the current time. Availability and error
    /// rate are derived from `status`.
    pub fn new(
        service_name: impl Into<String>,
        status: ServiceStatus,
        response_time_ms: f64,
        usage: ResourceUsage,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            service_name: service_name.into(),
            status,
            response_time_ms: response_time_ms.max(0.0),
            cpu_pct: usage.cpu_pct,
            memory_pct: usage.memory_pct,
            error_rate_pct: status.error_rate_pct(),
            availability: status.availability(),
        }
    }

    /// Replace the timestamp, e.g. when replaying recorded observations.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.status == ServiceStatus::Healthy
    }
}
