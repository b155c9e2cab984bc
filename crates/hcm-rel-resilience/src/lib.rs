//! ---
//! hcm_section: "03-fault-tolerance"
//! hcm_subsection: "module"
//! hcm_type: "source"
//! hcm_scope: "code"
//! hcm_description: "Fault scenarios, injection and recovery for the HCM harness."
//! hcm_version: "v0.1.0"
//! hcm_owner: "tbd"
//! ---
//! Fault injection, recovery and fault-tolerance campaigns.
#![warn(missing_docs)]

pub mod campaign;
pub mod fault;
pub mod metrics;
pub mod recovery;

pub use campaign::{CampaignError, CampaignReport, FaultToleranceCampaign, ScenarioRun};
pub use fault::{
    FaultError, FaultInjector, FaultPlan, FaultScenario, FaultType, InjectedFault,
    InjectionRecord, InjectionStatus, Severity, TargetInjection,
};
pub use metrics::ResilienceMetrics;
pub use recovery::{RecoveryOutcome, RecoveryPolicy, RecoveryReport, TargetRecovery};

/// Crate prelude collecting the most commonly used builders.
pub mod prelude {
    pub use super::campaign::{CampaignReport, FaultToleranceCampaign};
    pub use super::fault::{FaultInjector, FaultPlan, FaultScenario, FaultType, Severity};
    pub use super::metrics::ResilienceMetrics;
    pub use super::recovery::{RecoveryOutcome, RecoveryPolicy};
}
