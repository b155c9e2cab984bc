//! ---
//! hcm_section: "03-fault-tolerance"
//! hcm_subsection: "module"
//! hcm_type: "source"
//! hcm_scope: "code"
//! hcm_description: "Fault scenarios, injection and recovery for the HCM harness."
//! hcm_version: "v0.1.0"
//! hcm_owner: "tbd"
//! ---
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use hcm_rel_core::{DynContainerRuntime, ServiceRegistry};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use thiserror::Error;
use tokio::time::{sleep_until, Instant};
use tracing::{info, warn};

use crate::metrics::ResilienceMetrics;
use crate::recovery::{RecoveryOutcome, RecoveryPolicy, RecoveryReport, TargetRecovery};

/// Kind of degradation applied to every target of a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultType {
    /// Stop the backing container; reversed by restarting it.
    Stop,
    /// CPU stress on the service. Logged only.
    Stress,
    /// Network latency on the service. Logged only.
    Network,
    /// Memory pressure on the service. Logged only.
    Memory,
}

impl FaultType {
    /// Stable lowercase label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultType::Stop => "stop",
            FaultType::Stress => "stress",
            FaultType::Network => "network",
            FaultType::Memory => "memory",
        }
    }

    /// Whether recovery has to restart the targets.
    pub fn requires_restart(&self) -> bool {
        matches!(self, FaultType::Stop)
    }
}

/// Expected impact of a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Single non-critical service.
    Minor,
    /// Shared infrastructure.
    Major,
    /// Several services at once.
    Critical,
}

impl Severity {
    /// Stable lowercase label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Minor => "minor",
            Severity::Major => "major",
            Severity::Critical => "critical",
        }
    }
}

/// Scripted, time-bounded degradation of one or more services.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultScenario {
    /// Unique scenario name within a plan.
    pub name: String,
    /// Free-form operator description.
    #[serde(default)]
    pub description: String,
    /// Services degraded by the scenario, in injection order.
    pub targets: Vec<String>,
    /// Degradation applied to every target.
    #[serde(rename = "type")]
    pub fault_type: FaultType,
    /// Time the fault stays in place before recovery starts.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(rename = "duration_secs")]
    pub duration: Duration,
    /// Expected impact.
    pub severity: Severity,
}

impl FaultScenario {
    /// Build a scenario without a description.
    pub fn new(
        name: impl Into<String>,
        targets: Vec<String>,
        fault_type: FaultType,
        duration: Duration,
        severity: Severity,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            targets,
            fault_type,
            duration,
            severity,
        }
    }

    /// Attach an operator description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Reject scenarios that cannot be injected.
    pub fn validate(&self) -> Result<(), FaultError> {
        let invalid = |reason: &str| FaultError::InvalidScenario {
            scenario: self.name.clone(),
            reason: reason.to_owned(),
        };
        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.targets.is_empty() {
            return Err(invalid("at least one target service is required"));
        }
        if self.targets.iter().any(|target| target.trim().is_empty()) {
            return Err(invalid("target service names must not be empty"));
        }
        let unique: HashSet<&str> = self.targets.iter().map(String::as_str).collect();
        if unique.len() != self.targets.len() {
            return Err(invalid("target services must be unique"));
        }
        Ok(())
    }
}

/// Ordered list of scenarios loaded from a TOML plan file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultPlan {
    /// Scenarios executed in order.
    #[serde(default)]
    pub scenarios: Vec<FaultScenario>,
}

impl FaultPlan {
    /// Load and validate a plan from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())
            .with_context(|| format!("unable to read fault plan {}", path.as_ref().display()))?;
        contents
            .parse::<Self>()
            .with_context(|| format!("invalid fault plan {}", path.as_ref().display()))
    }

    /// Validate every scenario and reject duplicate names.
    pub fn validate(&self) -> Result<(), FaultError> {
        let mut names = HashSet::new();
        for scenario in &self.scenarios {
            scenario.validate()?;
            if !names.insert(scenario.name.as_str()) {
                return Err(FaultError::InvalidScenario {
                    scenario: scenario.name.clone(),
                    reason: "scenario names must be unique within a plan".to_owned(),
                });
            }
        }
        Ok(())
    }

    /// Number of scenarios.
    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    /// Whether the plan holds no scenarios.
    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }

    /// Scenarios in execution order.
    pub fn iter(&self) -> impl Iterator<Item = &FaultScenario> {
        self.scenarios.iter()
    }
}

impl std::str::FromStr for FaultPlan {
    type Err = anyhow::Error;

    fn from_str(input: &str) -> std::result::Result<Self, Self::Err> {
        let plan = toml::from_str::<Self>(input).map_err(anyhow::Error::new)?;
        plan.validate()?;
        Ok(plan)
    }
}

/// Misuse of the fault injector.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FaultError {
    /// The scenario cannot be injected as written.
    #[error("invalid fault scenario '{scenario}': {reason}")]
    InvalidScenario {
        /// Offending scenario.
        scenario: String,
        /// What is wrong with it.
        reason: String,
    },
    /// A target is already degraded by another, unrecovered scenario.
    #[error("service '{service}' is already under unrecovered fault '{holder}'")]
    TargetBusy {
        /// Contended service.
        service: String,
        /// Scenario currently holding the service.
        holder: String,
    },
    /// The same scenario is already injected and not yet recovered.
    #[error("fault '{0}' is already injected and not yet recovered")]
    AlreadyInjected(String),
}

/// How a single target was degraded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionStatus {
    /// The runtime executed the fault.
    Applied,
    /// Logged stressor with no runtime action.
    Logged,
    /// No runtime was available to act on the container.
    Unapplied,
    /// The runtime rejected the action.
    Failed(String),
}

/// Injection result for one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetInjection {
    /// Service named by the scenario.
    pub service: String,
    /// Container acted on.
    pub container: String,
    /// Outcome of the injection.
    pub status: InjectionStatus,
}

/// Serializable trace of an injection, kept after the fault is recovered.
#[derive(Debug, Clone, Serialize)]
pub struct InjectionRecord {
    /// Scenario name.
    pub scenario: String,
    /// Fault type applied.
    pub fault_type: FaultType,
    /// Scenario severity.
    pub severity: Severity,
    /// Wall-clock injection time.
    pub injected_at: DateTime<Utc>,
    /// Per-target results.
    pub targets: Vec<TargetInjection>,
}

impl InjectionRecord {
    /// True when every target was applied or logged.
    pub fn fully_applied(&self) -> bool {
        self.targets
            .iter()
            .all(|target| matches!(target.status, InjectionStatus::Applied | InjectionStatus::Logged))
    }
}

/// A fault currently in place. Consumed by [`FaultInjector::recover`].
#[derive(Debug)]
#[must_use = "an injected fault stays in place until passed to FaultInjector::recover"]
pub struct InjectedFault {
    scenario: FaultScenario,
    record: InjectionRecord,
    started: Instant,
}

impl InjectedFault {
    /// Scenario that produced the fault.
    pub fn scenario(&self) -> &FaultScenario {
        &self.scenario
    }

    /// Injection trace.
    pub fn record(&self) -> &InjectionRecord {
        &self.record
    }

    /// Earliest instant at which recovery may begin.
    pub fn recover_after(&self) -> Instant {
        self.started + self.scenario.duration
    }
}

/// Applies scenarios against the container runtime and reverses them.
#[derive(Debug)]
pub struct FaultInjector {
    registry: Arc<ServiceRegistry>,
    runtime: Option<DynContainerRuntime>,
    policy: RecoveryPolicy,
    metrics: Option<ResilienceMetrics>,
    /// Service name -> scenario currently holding it.
    active: Mutex<HashMap<String, String>>,
}

impl FaultInjector {
    /// Build an injector resolving containers through `registry`.
    pub fn new(
        registry: Arc<ServiceRegistry>,
        runtime: Option<DynContainerRuntime>,
        policy: RecoveryPolicy,
        metrics: Option<ResilienceMetrics>,
    ) -> Self {
        Self {
            registry,
            runtime,
            policy,
            metrics,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Services currently under an unrecovered fault.
    pub fn busy_services(&self) -> Vec<String> {
        let mut services: Vec<String> = self.active.lock().keys().cloned().collect();
        services.sort();
        services
    }

    /// Degrade every target of `scenario`.
    ///
    /// Runtime failures are recorded per target and never abort the
    /// injection; only misuse yields an error.
    pub async fn inject(&self, scenario: &FaultScenario) -> Result<InjectedFault, FaultError> {
        scenario.validate()?;
        self.claim(scenario)?;

        let started = Instant::now();
        let injected_at = Utc::now();
        warn!(
            scenario = %scenario.name,
            fault_type = scenario.fault_type.as_str(),
            severity = scenario.severity.as_str(),
            targets = ?scenario.targets,
            duration_secs = scenario.duration.as_secs(),
            "injecting fault"
        );

        let mut targets = Vec::with_capacity(scenario.targets.len());
        for service in &scenario.targets {
            let container = self.registry.container_for(service);
            let status = self.apply(scenario, service, &container).await;
            targets.push(TargetInjection {
                service: service.clone(),
                container,
                status,
            });
        }

        if let Some(metrics) = &self.metrics {
            metrics.inc_fault(scenario.fault_type.as_str());
        }
        let record = InjectionRecord {
            scenario: scenario.name.clone(),
            fault_type: scenario.fault_type,
            severity: scenario.severity,
            injected_at,
            targets,
        };
        if !record.fully_applied() {
            warn!(scenario = %scenario.name, "fault applied on a best-effort basis");
        }
        Ok(InjectedFault {
            scenario: scenario.clone(),
            record,
            started,
        })
    }

    /// Wait out the scenario duration, then reverse the fault.
    ///
    /// Targets are released from the conflict table whatever the outcome.
    pub async fn recover(&self, fault: InjectedFault) -> RecoveryReport {
        sleep_until(fault.recover_after()).await;
        self.recover_now(fault).await
    }

    /// Reverse the fault without waiting for the scenario duration, e.g.
    /// when a campaign is interrupted.
    pub async fn recover_now(&self, fault: InjectedFault) -> RecoveryReport {
        let InjectedFault {
            scenario, record, ..
        } = fault;
        info!(scenario = %scenario.name, "starting fault recovery");

        let mut targets = Vec::with_capacity(record.targets.len());
        for target in &record.targets {
            let outcome = match (&self.runtime, scenario.fault_type.requires_restart()) {
                (Some(runtime), true) => {
                    self.policy
                        .restore(runtime.as_ref(), &target.container)
                        .await
                }
                _ => RecoveryOutcome::NotRequired,
            };
            if let Some(metrics) = &self.metrics {
                metrics.record_recovery(&outcome);
            }
            targets.push(TargetRecovery {
                service: target.service.clone(),
                container: target.container.clone(),
                outcome,
            });
        }

        self.release(&scenario);
        let report = RecoveryReport {
            scenario: scenario.name,
            recovered_at: Utc::now(),
            targets,
        };
        info!(
            scenario = %report.scenario,
            restored = report.all_restored(),
            "fault recovery finished"
        );
        report
    }

    fn claim(&self, scenario: &FaultScenario) -> Result<(), FaultError> {
        let mut active = self.active.lock();
        for service in &scenario.targets {
            if let Some(holder) = active.get(service) {
                if *holder == scenario.name {
                    return Err(FaultError::AlreadyInjected(scenario.name.clone()));
                }
                return Err(FaultError::TargetBusy {
                    service: service.clone(),
                    holder: holder.clone(),
                });
            }
        }
        for service in &scenario.targets {
            active.insert(service.clone(), scenario.name.clone());
        }
        Ok(())
    }

    fn release(&self, scenario: &FaultScenario) {
        let mut active = self.active.lock();
        active.retain(|_, holder| *holder != scenario.name);
    }

    async fn apply(&self, scenario: &FaultScenario, service: &str, container: &str) -> InjectionStatus {
        match scenario.fault_type {
            FaultType::Stop => {
                let Some(runtime) = &self.runtime else {
                    warn!(scenario = %scenario.name, service, container, "no container runtime; stop not applied");
                    return InjectionStatus::Unapplied;
                };
                match runtime.stop(container).await {
                    Ok(()) => {
                        info!(scenario = %scenario.name, service, container, "container stopped");
                        InjectionStatus::Applied
                    }
                    Err(err) => {
                        warn!(scenario = %scenario.name, service, container, error = %err, "fault injection failed");
                        InjectionStatus::Failed(err.to_string())
                    }
                }
            }
            FaultType::Stress | FaultType::Network | FaultType::Memory => {
                info!(
                    scenario = %scenario.name,
                    service,
                    fault_type = scenario.fault_type.as_str(),
                    "stressor applied"
                );
                InjectionStatus::Logged
            }
        }
    }
}
