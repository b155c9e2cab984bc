//! ---
//! hcm_section: "03-fault-tolerance"
//! hcm_subsection: "module"
//! hcm_type: "source"
//! hcm_scope: "code"
//! hcm_description: "Fault scenarios, injection and recovery for the HCM harness."
//! hcm_version: "v0.1.0"
//! hcm_owner: "tbd"
//! ---
use std::time::Duration;

use chrono::{DateTime, Utc};
use hcm_rel_common::config::RecoveryConfig;
use hcm_rel_core::{ContainerRuntime, RuntimeError};
use serde::Serialize;
use serde_with::{serde_as, DurationSecondsWithFrac};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

/// Restart-and-poll parameters applied to every stopped container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryPolicy {
    /// Delay between running-state checks after a restart.
    pub poll_interval: Duration,
    /// Give up once this much time has passed since the restart request.
    pub max_wait: Duration,
}

impl RecoveryPolicy {
    /// Construct a policy; a zero poll interval is raised to one millisecond.
    pub fn new(poll_interval: Duration, max_wait: Duration) -> Self {
        Self {
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            max_wait,
        }
    }

    /// Restart `container` and wait until the runtime reports it running.
    ///
    /// The restart request and every state query count against one
    /// `max_wait` budget measured from the call.
    pub async fn restore(&self, runtime: &dyn ContainerRuntime, container: &str) -> RecoveryOutcome {
        let started = Instant::now();
        let deadline = started.checked_add(self.max_wait).unwrap_or_else(far_future);

        match timeout(self.max_wait, runtime.start(container)).await {
            Ok(Ok(())) => info!(container, "container restart requested"),
            Ok(Err(err)) => {
                warn!(container, error = %err, "container restart failed");
                return RecoveryOutcome::StartFailed(err.to_string());
            }
            Err(_) => {
                let err = RuntimeError::Timeout(self.max_wait);
                warn!(container, error = %err, "container restart failed");
                return RecoveryOutcome::StartFailed(err.to_string());
            }
        }

        while Instant::now() < deadline {
            let wake = Instant::now()
                .checked_add(self.poll_interval)
                .map_or(deadline, |next| next.min(deadline));
            sleep_until(wake).await;

            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, runtime.state(container)).await {
                Ok(Ok(state)) if state.running => {
                    let waited = started.elapsed();
                    info!(container, elapsed_ms = waited.as_millis() as u64, "container restored");
                    return RecoveryOutcome::Restored { waited };
                }
                Ok(Ok(state)) => {
                    debug!(container, status = %state.status, elapsed_ms = started.elapsed().as_millis() as u64, "container not running yet");
                }
                Ok(Err(err)) => {
                    debug!(container, error = %err, "container state unavailable while recovering");
                }
                Err(_) => {
                    debug!(container, "container state query outlived the recovery budget");
                }
            }
        }

        warn!(
            container,
            max_wait_secs = self.max_wait.as_secs(),
            "container recovery timed out"
        );
        RecoveryOutcome::TimedOut
    }
}

fn far_future() -> Instant {
    // About thirty years out.
    Instant::now() + Duration::from_secs(86_400 * 365 * 30)
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(60))
    }
}

impl From<&RecoveryConfig> for RecoveryPolicy {
    fn from(config: &RecoveryConfig) -> Self {
        Self::new(config.poll_interval, config.max_wait)
    }
}

/// Result of recovering one target.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryOutcome {
    /// Running again `waited` after the restart was requested.
    Restored {
        /// Time from the restart request until the running state was observed.
        #[serde_as(as = "DurationSecondsWithFrac<f64>")]
        #[serde(rename = "waited_secs")]
        waited: Duration,
    },
    /// Still not running once the policy's maximum wait elapsed.
    TimedOut,
    /// The runtime refused to start the container.
    StartFailed(String),
    /// Nothing to reverse for this target.
    NotRequired,
}

impl RecoveryOutcome {
    /// Stable label used in metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryOutcome::Restored { .. } => "restored",
            RecoveryOutcome::TimedOut => "timed_out",
            RecoveryOutcome::StartFailed(_) => "start_failed",
            RecoveryOutcome::NotRequired => "not_required",
        }
    }

    /// Measured restore time, if the target was restored.
    pub fn restore_time(&self) -> Option<Duration> {
        match self {
            RecoveryOutcome::Restored { waited } => Some(*waited),
            _ => None,
        }
    }
}

/// Recovery result for one target service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetRecovery {
    /// Service named by the scenario.
    pub service: String,
    /// Container acted on.
    pub container: String,
    /// What happened.
    pub outcome: RecoveryOutcome,
}

/// Per-scenario recovery summary.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryReport {
    /// Scenario name.
    pub scenario: String,
    /// Wall-clock time recovery finished.
    pub recovered_at: DateTime<Utc>,
    /// Per-target outcomes in scenario order.
    pub targets: Vec<TargetRecovery>,
}

impl RecoveryReport {
    /// True when no target timed out or failed to start.
    pub fn all_restored(&self) -> bool {
        self.targets.iter().all(|target| {
            matches!(
                target.outcome,
                RecoveryOutcome::Restored { .. } | RecoveryOutcome::NotRequired
            )
        })
    }

    /// Restore times of every restored target.
    pub fn restore_times(&self) -> impl Iterator<Item = Duration> + '_ {
        self.targets
            .iter()
            .filter_map(|target| target.outcome.restore_time())
    }
}
