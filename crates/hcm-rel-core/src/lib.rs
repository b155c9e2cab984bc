//! ---
//! hcm_section: "02-monitoring-engine"
//! hcm_subsection: "module"
//! hcm_type: "source"
//! hcm_scope: "code"
//! hcm_description: "Health probing, monitoring and reliability reporting."
//! hcm_version: "v0.1.0"
//! hcm_owner: "tbd"
//! ---
//! Monitoring engine of the HCM reliability harness.
//!
//! A [`MonitorLoop`] fans a [`HealthProbe`] out over every service in the
//! [`ServiceRegistry`] once per tick and appends the classified samples to a
//! shared [`MetricLog`]. [`ReliabilityCalculator`] reduces that log into a
//! [`ReliabilityReport`] on demand.

pub mod calculator;
pub mod harness;
pub mod inspector;
pub mod log;
pub mod model;
pub mod monitor;
pub mod probe;
pub mod registry;
pub mod runtime;

pub use calculator::{AvailabilityBand, ReliabilityCalculator, ReliabilityReport, SLA_TARGET};
pub use harness::{connect_runtime, Harness};
pub use inspector::ContainerInspector;
pub use log::MetricLog;
pub use model::{ResourceUsage, ServiceMetric, ServiceStatus};
pub use monitor::{MonitorError, MonitorLoop, MonitorSession, SessionSummary};
pub use probe::{HealthProbe, ProbeFailure, ProbeOutcome};
pub use registry::{HealthSurface, RegistryError, ServiceDefinition, ServiceRegistry};
pub use runtime::{
    ContainerRuntime, ContainerState, ContainerStats, DockerEngine, DynContainerRuntime,
    RuntimeError, SimulatedRuntime, StartBehaviour,
};
