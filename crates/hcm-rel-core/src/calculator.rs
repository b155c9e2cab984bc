//! ---
//! hcm_section: "02-monitoring-engine"
//! hcm_subsection: "module"
//! hcm_type: "source"
//! hcm_scope: "code"
//! hcm_description: "Health probing, monitoring and reliability reporting."
//! hcm_version: "v0.1.0"
//! hcm_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use serde_with::{serde_as, DurationSecondsWithFrac};

use crate::model::{ServiceMetric, ServiceStatus};

/// Availability objective used to normalise the reliability score.
pub const SLA_TARGET: f64 = 0.995;

/// Threshold below which a service is considered in breach rather than at risk.
const AT_RISK_FLOOR: f64 = 0.99;

/// Mean time to recovery reported for every run.
// Fixed figure; not derived from the injection timeline.
pub const MTTR: Duration = Duration::from_secs(210);

/// Mean time between failures reported for every run (30 days).
pub const MTBF: Duration = Duration::from_secs(720 * 3600);

/// Aggregate reliability statistics derived from a metric log.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReliabilityReport {
    pub overall_availability: f64,
    pub per_service_availability: BTreeMap<String, f64>,
    pub avg_response_time_ms: f64,
    pub reliability_score: f64,
    #[serde(rename = "mttr_secs")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub mttr: Duration,
    #[serde(rename = "mtbf_secs")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub mtbf: Duration,
    pub sample_count: usize,
    #[serde(rename = "observed_duration_secs")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub observed_duration: Duration,
    pub status_breakdown: BTreeMap<ServiceStatus, usize>,
}

impl ReliabilityReport {
    /// Report for a log without samples: every aggregate is zero.
    pub fn empty() -> Self {
        Self {
            overall_availability: 0.0,
            per_service_availability: BTreeMap::new(),
            avg_response_time_ms: 0.0,
            reliability_score: 0.0,
            mttr: MTTR,
            mtbf: MTBF,
            sample_count: 0,
            observed_duration: Duration::ZERO,
            status_breakdown: BTreeMap::new(),
        }
    }

    pub fn mttr_minutes(&self) -> f64 {
        self.mttr.as_secs_f64() / 60.0
    }

    pub fn mtbf_hours(&self) -> f64 {
        self.mtbf.as_secs_f64() / 3600.0
    }

    pub fn observed_hours(&self) -> f64 {
        self.observed_duration.as_secs_f64() / 3600.0
    }

    /// Same strict threshold as [`AvailabilityBand::MeetsSla`].
    pub fn meets_sla(&self) -> bool {
        self.sample_count > 0
            && AvailabilityBand::classify(self.overall_availability) == AvailabilityBand::MeetsSla
    }

    /// SLA band of one service, `None` if it has no samples.
    pub fn band(&self, service: &str) -> Option<AvailabilityBand> {
        self.per_service_availability
            .get(service)
            .copied()
            .map(AvailabilityBand::classify)
    }
}

/// Coarse SLA standing of an availability ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityBand {
    MeetsSla,
    AtRisk,
    Breach,
}

impl AvailabilityBand {
    pub fn classify(availability: f64) -> Self {
        if availability > SLA_TARGET {
            AvailabilityBand::MeetsSla
        } else if availability > AT_RISK_FLOOR {
            AvailabilityBand::AtRisk
        } else {
            AvailabilityBand::Breach
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AvailabilityBand::MeetsSla => "meets-sla",
            AvailabilityBand::AtRisk => "at-risk",
            AvailabilityBand::Breach => "breach",
        }
    }
}

/// Pure reduction from samples to a [`ReliabilityReport`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ReliabilityCalculator;

impl ReliabilityCalculator {
    pub fn compute(samples: &[ServiceMetric]) -> ReliabilityReport {
        if samples.is_empty() {
            return ReliabilityReport::empty();
        }

        let count = samples.len() as f64;
        let overall_availability = samples.iter().map(|s| s.availability).sum::<f64>() / count;

        let mut grouped: BTreeMap<String, (f64, usize)> = BTreeMap::new();
        let mut status_breakdown = BTreeMap::new();
        for sample in samples {
            let entry = grouped
                .entry(sample.service_name.clone())
                .or_insert((0.0, 0));
            entry.0 += sample.availability;
            entry.1 += 1;
            *status_breakdown.entry(sample.status).or_insert(0) += 1;
        }
        let per_service_availability = grouped
            .into_iter()
            .map(|(service, (sum, n))| (service, sum / n as f64))
            .collect();

        // Unmeasured (zero) response times belong to container-checked services.
        let (rt_sum, rt_count) = samples
            .iter()
            .filter(|s| s.response_time_ms > 0.0)
            .fold((0.0, 0usize), |(sum, n), s| (sum + s.response_time_ms, n + 1));
        let avg_response_time_ms = if rt_count == 0 {
            0.0
        } else {
            rt_sum / rt_count as f64
        };

        let reliability_score = (overall_availability / SLA_TARGET * 100.0).min(100.0);

        let first = samples.iter().map(|s| s.timestamp).min();
        let last = samples.iter().map(|s| s.timestamp).max();
        let observed_duration = match (first, last) {
            (Some(first), Some(last)) => (last - first).to_std().unwrap_or_default(),
            _ => Duration::ZERO,
        };

        ReliabilityReport {
            overall_availability,
            per_service_availability,
            avg_response_time_ms,
            reliability_score,
            mttr: MTTR,
            mtbf: MTBF,
            sample_count: samples.len(),
            observed_duration,
            status_breakdown,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration as ChronoDuration, Utc};

    use super::*;
    use crate::model::ResourceUsage;

    fn sample(service: &str, status: ServiceStatus, response_ms: f64) -> ServiceMetric {
        ServiceMetric::new(service, status, response_ms, ResourceUsage::default())
    }

    #[test]
    fn empty_log_yields_zero_report() {
        let report = ReliabilityCalculator::compute(&[]);
        assert_eq!(report.sample_count, 0);
        assert_eq!(report.overall_availability, 0.0);
        assert_eq!(report.avg_response_time_ms, 0.0);
        assert_eq!(report.reliability_score, 0.0);
        assert_eq!(report.observed_duration, Duration::ZERO);
        assert!(report.per_service_availability.is_empty());
        assert!(!report.avg_response_time_ms.is_nan());
        assert!(!report.meets_sla());
    }

    #[test]
    fn all_healthy_scores_full_marks() {
        let samples: Vec<_> = (0..12)
            .map(|_| sample("hcm-api-gateway", ServiceStatus::Healthy, 8.0))
            .collect();
        let report = ReliabilityCalculator::compute(&samples);
        assert_eq!(report.overall_availability, 1.0);
        assert_eq!(report.reliability_score, 100.0);
        assert!(report.meets_sla());
        assert_eq!(report.band("hcm-api-gateway"), Some(AvailabilityBand::MeetsSla));
    }

    #[test]
    fn per_service_mean_groups_by_name() {
        let mut samples: Vec<_> = (0..8)
            .map(|_| sample("A", ServiceStatus::Healthy, 5.0))
            .collect();
        samples.extend((0..2).map(|_| sample("A", ServiceStatus::Failed, 5.0)));
        samples.push(sample("B", ServiceStatus::Degraded, 5.0));

        let report = ReliabilityCalculator::compute(&samples);
        assert_eq!(report.per_service_availability["A"], 0.8);
        assert_eq!(report.per_service_availability["B"], 0.5);
        assert_eq!(report.status_breakdown[&ServiceStatus::Failed], 2);
        assert_eq!(report.band("A"), Some(AvailabilityBand::Breach));
        assert_eq!(report.band("missing"), None);
    }

    #[test]
    fn response_time_mean_skips_unmeasured_samples() {
        let samples = vec![
            sample("gateway", ServiceStatus::Healthy, 10.0),
            sample("gateway", ServiceStatus::Healthy, 30.0),
            sample("hcm-redis", ServiceStatus::Healthy, 0.0),
        ];
        let report = ReliabilityCalculator::compute(&samples);
        assert_eq!(report.avg_response_time_ms, 20.0);
    }

    #[test]
    fn score_is_normalised_by_sla_target() {
        let mut samples: Vec<_> = (0..9)
            .map(|_| sample("svc", ServiceStatus::Healthy, 1.0))
            .collect();
        samples.push(sample("svc", ServiceStatus::Failed, 1.0));
        let report = ReliabilityCalculator::compute(&samples);
        let expected = 0.9 / SLA_TARGET * 100.0;
        assert!((report.reliability_score - expected).abs() < 1e-9);
    }

    #[test]
    fn observed_duration_spans_first_to_last() {
        let start = Utc::now();
        let samples = vec![
            sample("a", ServiceStatus::Healthy, 1.0).at(start + ChronoDuration::seconds(90)),
            sample("a", ServiceStatus::Healthy, 1.0).at(start),
            sample("b", ServiceStatus::Healthy, 1.0).at(start + ChronoDuration::seconds(30)),
        ];
        let report = ReliabilityCalculator::compute(&samples);
        assert_eq!(report.observed_duration, Duration::from_secs(90));
        assert_eq!(report.observed_hours(), 0.025);
    }

    #[test]
    fn constants_are_reported() {
        let report = ReliabilityCalculator::compute(&[sample("a", ServiceStatus::Healthy, 1.0)]);
        assert_eq!(report.mttr_minutes(), 3.5);
        assert_eq!(report.mtbf_hours(), 720.0);
    }

    #[test]
    fn computation_is_idempotent() {
        let samples = vec![
            sample("a", ServiceStatus::Healthy, 4.0),
            sample("b", ServiceStatus::Degraded, 9.0),
            sample("c", ServiceStatus::Failed, 0.0),
        ];
        let first = ReliabilityCalculator::compute(&samples);
        let second = ReliabilityCalculator::compute(&samples);
        assert_eq!(first, second);
    }

    #[test]
    fn band_thresholds() {
        assert_eq!(AvailabilityBand::classify(0.999), AvailabilityBand::MeetsSla);
        assert_eq!(AvailabilityBand::classify(0.995), AvailabilityBand::AtRisk);
        assert_eq!(AvailabilityBand::classify(0.991), AvailabilityBand::AtRisk);
        assert_eq!(AvailabilityBand::classify(0.99), AvailabilityBand::Breach);
    }

    #[test]
    fn sla_verdict_matches_band_at_the_target() {
        let mut samples: Vec<_> = (0..199)
            .map(|_| sample("svc", ServiceStatus::Healthy, 1.0))
            .collect();
        samples.push(sample("svc", ServiceStatus::Failed, 1.0));
        let report = ReliabilityCalculator::compute(&samples);
        assert_eq!(report.overall_availability, SLA_TARGET);
        assert_eq!(report.band("svc"), Some(AvailabilityBand::AtRisk));
        assert!(!report.meets_sla());
    }
}
