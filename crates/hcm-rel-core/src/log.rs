//! ---
//! hcm_section: "02-monitoring-engine"
//! hcm_subsection: "module"
//! hcm_type: "source"
//! hcm_scope: "code"
//! hcm_description: "Health probing, monitoring and reliability reporting."
//! hcm_version: "v0.1.0"
//! hcm_owner: "tbd"
//! ---
use std::sync::Arc;

use parking_lot::RwLock;

use crate::calculator::{ReliabilityCalculator, ReliabilityReport};
use crate::model::ServiceMetric;

/// Shared append-only store of health samples.
///
/// Clones share the same storage. Only the monitoring loop appends; every
/// other holder reads through [`MetricLog::snapshot`] or [`MetricLog::report`].
#[derive(Debug, Clone, Default)]
pub struct MetricLog {
    samples: Arc<RwLock<Vec<ServiceMetric>>>,
}

impl MetricLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one tick's batch under a single write lock, ordered by timestamp.
    /// Returns the log length after the append.
    pub(crate) fn append_batch(&self, mut batch: Vec<ServiceMetric>) -> usize {
        batch.sort_by_key(|sample| sample.timestamp);
        let mut samples = self.samples.write();
        samples.extend(batch);
        samples.len()
    }

    pub fn len(&self) -> usize {
        self.samples.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.read().is_empty()
    }

    /// Copy of every sample recorded so far.
    pub fn snapshot(&self) -> Vec<ServiceMetric> {
        self.samples.read().clone()
    }

    pub fn for_service(&self, service: &str) -> Vec<ServiceMetric> {
        self.samples
            .read()
            .iter()
            .filter(|sample| sample.service_name == service)
            .cloned()
            .collect()
    }

    /// Reduce the current contents into a reliability report.
    pub fn report(&self) -> ReliabilityReport {
        ReliabilityCalculator::compute(&self.samples.read())
    }
}
