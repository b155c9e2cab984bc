//! ---
//! hcm_section: "01-core-functionality"
//! hcm_subsection: "module"
//! hcm_type: "source"
//! hcm_scope: "code"
//! hcm_description: "Shared primitives and utilities for the reliability harness."
//! hcm_version: "v0.1.0"
//! hcm_owner: "tbd"
//! ---
//! Shared primitives for the HCM reliability harness workspace.
//! This crate exposes configuration loading and tracing initialisation
//! consumed by the core engine, the resilience tooling and the CLI.

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, CampaignConfig, LoadedAppConfig, LoggingConfig, MetricsConfig, MonitorConfig,
    RecoveryConfig, RuntimeConfig, ServiceConfig, ServiceKind,
};
pub use logging::{init_tracing, LogFormat, LogGuard, LogRotation};
