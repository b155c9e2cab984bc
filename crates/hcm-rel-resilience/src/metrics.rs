//! ---
//! hcm_section: "03-fault-tolerance"
//! hcm_subsection: "module"
//! hcm_type: "source"
//! hcm_scope: "code"
//! hcm_description: "Fault scenarios, injection and recovery for the HCM harness."
//! hcm_version: "v0.1.0"
//! hcm_owner: "tbd"
//! ---
use anyhow::Result;
use hcm_rel_metrics::SharedRegistry;
use prometheus::{self, Histogram, HistogramOpts, IntCounterVec, Opts};

use crate::recovery::RecoveryOutcome;

/// Metrics published by fault injection and recovery.
#[derive(Clone)]
pub struct ResilienceMetrics {
    registry: SharedRegistry,
    faults_injected_total: IntCounterVec,
    recoveries_total: IntCounterVec,
    recovery_wait_seconds: Histogram,
}

impl ResilienceMetrics {
    /// Register the resilience metric families against the provided registry.
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let faults_injected_total = IntCounterVec::new(
            Opts::new(
                "hcm_rel_faults_injected_total",
                "Fault scenarios injected, by fault type",
            ),
            &["fault_type"],
        )?;
        registry.register(Box::new(faults_injected_total.clone()))?;

        let recoveries_total = IntCounterVec::new(
            Opts::new(
                "hcm_rel_recoveries_total",
                "Per-target recovery outcomes after a fault",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(recoveries_total.clone()))?;

        let histogram_opts = HistogramOpts::new(
            "hcm_rel_recovery_wait_seconds",
            "Time between restart request and the container reporting running",
        )
        .buckets(prometheus::linear_buckets(5.0, 5.0, 12)?);
        let recovery_wait_seconds = Histogram::with_opts(histogram_opts)?;
        registry.register(Box::new(recovery_wait_seconds.clone()))?;

        Ok(Self {
            registry,
            faults_injected_total,
            recoveries_total,
            recovery_wait_seconds,
        })
    }

    /// Expose the underlying shared registry for convenience.
    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    /// Count one injected scenario.
    pub fn inc_fault(&self, fault_type: &str) {
        self.faults_injected_total
            .with_label_values(&[fault_type])
            .inc();
    }

    /// Count a recovery outcome and observe its wait when restored.
    pub fn record_recovery(&self, outcome: &RecoveryOutcome) {
        self.recoveries_total
            .with_label_values(&[outcome.as_str()])
            .inc();
        if let Some(waited) = outcome.restore_time() {
            self.recovery_wait_seconds.observe(waited.as_secs_f64());
        }
    }
}

impl std::fmt::Debug for ResilienceMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceMetrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use hcm_rel_metrics::new_registry;

    use super::*;

    #[test]
    fn records_faults_and_recoveries() {
        let registry = new_registry();
        let metrics = ResilienceMetrics::new(registry.clone()).unwrap();
        metrics.inc_fault("stop");
        metrics.record_recovery(&RecoveryOutcome::Restored {
            waited: Duration::from_secs(5),
        });
        metrics.record_recovery(&RecoveryOutcome::TimedOut);

        let families = registry.gather();
        let wait = families
            .iter()
            .find(|family| family.get_name() == "hcm_rel_recovery_wait_seconds")
            .unwrap();
        assert_eq!(wait.get_metric()[0].get_histogram().get_sample_count(), 1);
        let outcomes = families
            .iter()
            .find(|family| family.get_name() == "hcm_rel_recoveries_total")
            .unwrap();
        assert_eq!(outcomes.get_metric().len(), 2);
    }
}
