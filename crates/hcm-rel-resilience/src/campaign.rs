//! ---
//! hcm_section: "03-fault-tolerance"
//! hcm_subsection: "module"
//! hcm_type: "source"
//! hcm_scope: "code"
//! hcm_description: "Fault scenarios, injection and recovery for the HCM harness."
//! hcm_version: "v0.1.0"
//! hcm_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hcm_rel_common::config::CampaignConfig;
use hcm_rel_core::{MonitorError, MonitorLoop, ReliabilityReport, SessionSummary};
use serde::Serialize;
use serde_with::{serde_as, DurationSecondsWithFrac};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::fault::{FaultError, FaultInjector, FaultPlan, FaultScenario, InjectionRecord};
use crate::recovery::RecoveryReport;

/// Misuse that stops a campaign before or between phases.
#[derive(Debug, Error)]
pub enum CampaignError {
    /// The monitor was busy or its session task died.
    #[error(transparent)]
    Monitor(#[from] MonitorError),
    /// The plan or a scenario was rejected by the injector.
    #[error(transparent)]
    Fault(#[from] FaultError),
}

/// Everything observed while running one scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioRun {
    /// Injection trace.
    pub injection: InjectionRecord,
    /// Healthy-state session before injection.
    pub baseline: SessionSummary,
    /// Session covering the fault window.
    pub during_fault: SessionSummary,
    /// Recovery outcomes.
    pub recovery: RecoveryReport,
    /// Session after recovery; absent when the campaign was interrupted.
    pub post_recovery: Option<SessionSummary>,
}

/// Result of a full fault-tolerance campaign.
#[serde_as]
#[derive(Debug, Clone, Serialize)]
pub struct CampaignReport {
    /// Campaign start time.
    pub started_at: DateTime<Utc>,
    /// Campaign end time.
    pub finished_at: DateTime<Utc>,
    /// Per-scenario results in plan order.
    pub scenarios: Vec<ScenarioRun>,
    /// Reliability over every sample collected by the monitor.
    pub reliability: ReliabilityReport,
    /// Mean of the measured restore times, if any target was restored.
    #[serde_as(as = "Option<DurationSecondsWithFrac<f64>>")]
    #[serde(rename = "mean_restore_time_secs")]
    pub mean_restore_time: Option<Duration>,
    /// True when a shutdown request cut the campaign short.
    pub interrupted: bool,
}

impl CampaignReport {
    /// Mean time between restart request and running state across every
    /// restored target. Informational only; the report's MTTR stays fixed.
    pub fn mean_restore_time(&self) -> Option<Duration> {
        self.mean_restore_time
    }

    /// True when every scenario recovered every target.
    pub fn all_restored(&self) -> bool {
        self.scenarios.iter().all(|run| run.recovery.all_restored())
    }
}

fn mean_restore_time(runs: &[ScenarioRun]) -> Option<Duration> {
    let times: Vec<Duration> = runs
        .iter()
        .flat_map(|run| run.recovery.restore_times())
        .collect();
    if times.is_empty() {
        return None;
    }
    let total: Duration = times.iter().sum();
    Some(total / times.len() as u32)
}

/// Drives monitor, inject, monitor, recover, monitor for each scenario of a plan.
#[derive(Debug)]
pub struct FaultToleranceCampaign {
    monitor: MonitorLoop,
    injector: Arc<FaultInjector>,
    baseline: Duration,
    observation: Duration,
}

impl FaultToleranceCampaign {
    /// Build a campaign over an existing monitor and injector.
    pub fn new(monitor: MonitorLoop, injector: Arc<FaultInjector>, config: &CampaignConfig) -> Self {
        Self {
            monitor,
            injector,
            baseline: config.baseline,
            observation: config.observation,
        }
    }

    /// Monitor used for every phase.
    pub fn monitor(&self) -> &MonitorLoop {
        &self.monitor
    }

    /// Run every scenario of `plan` in order.
    ///
    /// Probe, injection and recovery faults are recorded in the report; only
    /// an invalid plan or a busy monitor ends the campaign early.
    pub async fn run(&self, plan: &FaultPlan) -> Result<CampaignReport, CampaignError> {
        let (_keep_open, shutdown) = watch::channel(false);
        self.run_with_shutdown(plan, shutdown).await
    }

    /// Like [`FaultToleranceCampaign::run`], but stops once `shutdown` turns true.
    ///
    /// An interrupted scenario has its fault reversed straight away, so no
    /// container is left stopped; the remaining scenarios are skipped.
    pub async fn run_with_shutdown(
        &self,
        plan: &FaultPlan,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<CampaignReport, CampaignError> {
        plan.validate()?;
        let started_at = Utc::now();
        let total = plan.len();
        info!(
            scenarios = total,
            baseline_secs = self.baseline.as_secs(),
            observation_secs = self.observation.as_secs(),
            "fault-tolerance campaign started"
        );

        let mut runs = Vec::with_capacity(total);
        let mut interrupted = false;
        for (index, scenario) in plan.iter().enumerate() {
            if *shutdown.borrow() {
                interrupted = true;
                break;
            }
            info!(scenario = %scenario.name, position = index + 1, total, "running scenario");
            let Some(run) = self.run_scenario(scenario, &mut shutdown).await? else {
                interrupted = true;
                break;
            };
            info!(
                scenario = %scenario.name,
                restored = run.recovery.all_restored(),
                "scenario complete"
            );
            let cut_short = run.post_recovery.is_none();
            runs.push(run);
            if cut_short {
                interrupted = true;
                break;
            }
        }
        if interrupted {
            warn!(completed = runs.len(), total, "fault-tolerance campaign interrupted");
        }

        let report = CampaignReport {
            started_at,
            finished_at: Utc::now(),
            mean_restore_time: mean_restore_time(&runs),
            scenarios: runs,
            reliability: self.monitor.log().report(),
            interrupted,
        };
        info!(
            scenarios = report.scenarios.len(),
            availability = report.reliability.overall_availability,
            "fault-tolerance campaign finished"
        );
        Ok(report)
    }

    /// `None` when interrupted before anything was injected.
    async fn run_scenario(
        &self,
        scenario: &FaultScenario,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<ScenarioRun>, CampaignError> {
        let baseline = self.monitor_for(self.baseline, shutdown).await?;
        if baseline.stopped {
            return Ok(None);
        }

        let fault = self.injector.inject(scenario).await?;
        let injection = fault.record().clone();
        // The fault is always reversed, even if the fault-window session cannot run.
        let during_fault = self.monitor_for(scenario.duration, shutdown).await;
        let cut_short = during_fault.as_ref().map_or(false, |summary| summary.stopped);
        let recovery = if cut_short {
            warn!(scenario = %scenario.name, "interrupted during fault window; recovering now");
            self.injector.recover_now(fault).await
        } else {
            self.injector.recover(fault).await
        };
        let during_fault = during_fault?;

        let post_recovery = if cut_short {
            None
        } else {
            let summary = self.monitor_for(self.observation, shutdown).await?;
            Some(summary)
        };
        Ok(Some(ScenarioRun {
            injection,
            baseline,
            during_fault,
            recovery,
            post_recovery,
        }))
    }

    /// One monitoring session, stopped early if `shutdown` fires.
    async fn monitor_for(
        &self,
        duration: Duration,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SessionSummary, MonitorError> {
        let session = self.monitor.start(Some(duration))?;
        let stopper = session.stopper();
        let join = session.join();
        tokio::pin!(join);
        tokio::select! {
            summary = &mut join => summary,
            () = shutdown_requested(shutdown) => {
                stopper.send_replace(true);
                join.await
            }
        }
    }
}

/// Resolves once the flag is true; never resolves if every sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
