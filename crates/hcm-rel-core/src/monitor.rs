//! ---
//! hcm_section: "02-monitoring-engine"
//! hcm_subsection: "module"
//! hcm_type: "source"
//! hcm_scope: "code"
//! hcm_description: "Health probing, monitoring and reliability reporting."
//! hcm_version: "v0.1.0"
//! hcm_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use hcm_rel_metrics::MonitorMetrics;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::log::MetricLog;
use crate::model::ServiceMetric;
use crate::probe::HealthProbe;
use crate::registry::ServiceRegistry;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("a monitoring session is already active on this loop")]
    SessionActive,
    #[error("monitoring session aborted: {0}")]
    Aborted(String),
}

/// Totals for one finished monitoring session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub ticks: u64,
    pub samples: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// True when the session ended on a stop request rather than its deadline.
    pub stopped: bool,
}

#[derive(Debug)]
struct MonitorShared {
    registry: Arc<ServiceRegistry>,
    probe: HealthProbe,
    log: MetricLog,
    interval: Duration,
    active: AtomicBool,
    metrics: Option<MonitorMetrics>,
}

/// Periodic sampler over every registered service.
///
/// Clones drive the same log and share the single-session guard.
#[derive(Debug, Clone)]
pub struct MonitorLoop {
    shared: Arc<MonitorShared>,
}

impl MonitorLoop {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        probe: HealthProbe,
        log: MetricLog,
        interval: Duration,
        metrics: Option<MonitorMetrics>,
    ) -> Self {
        Self {
            shared: Arc::new(MonitorShared {
                registry,
                probe,
                log,
                interval,
                active: AtomicBool::new(false),
                metrics,
            }),
        }
    }

    pub fn log(&self) -> &MetricLog {
        &self.shared.log
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.shared.registry
    }

    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Spawn a sampling session. With `duration = None` it runs until stopped.
    pub fn start(&self, duration: Option<Duration>) -> Result<MonitorSession, MonitorError> {
        let guard = ActiveGuard::acquire(self.shared.clone())?;
        let (stop_tx, stop_rx) = watch::channel(false);
        info!(
            services = self.shared.registry.len(),
            interval_secs = self.shared.interval.as_secs_f64(),
            duration_secs = duration.map(|d| d.as_secs_f64()),
            "monitoring session started"
        );
        let task = tokio::spawn(run_session(guard, duration, stop_rx));
        Ok(MonitorSession {
            stop: Arc::new(stop_tx),
            task,
        })
    }

    /// Run exactly one tick outside of any session.
    pub async fn run_tick(&self) -> Result<Vec<ServiceMetric>, MonitorError> {
        let guard = ActiveGuard::acquire(self.shared.clone())?;
        Ok(guard.shared.tick(1).await)
    }
}

impl MonitorShared {
    async fn tick(&self, tick: u64) -> Vec<ServiceMetric> {
        let checks = self.registry.iter().map(|service| self.probe.check(service));
        let batch: Vec<ServiceMetric> = join_all(checks)
            .await
            .into_iter()
            .map(|outcome| outcome.into_sample())
            .collect();

        if let Some(metrics) = &self.metrics {
            metrics.inc_tick();
            for sample in &batch {
                metrics.observe_sample(
                    &sample.service_name,
                    sample.status.as_str(),
                    Duration::from_secs_f64(sample.response_time_ms.max(0.0) / 1000.0),
                    sample.availability,
                );
            }
        }

        let healthy = batch
            .iter()
            .filter(|sample| sample.is_healthy())
            .count();
        let total = batch.len();
        let recorded = self.log.append_batch(batch.clone());
        info!(tick, healthy, total, recorded, "{}/{} services healthy", healthy, total);
        batch
    }
}

/// Clears the active flag when the owning session or tick ends.
#[derive(Debug)]
struct ActiveGuard {
    shared: Arc<MonitorShared>,
}

impl ActiveGuard {
    fn acquire(shared: Arc<MonitorShared>) -> Result<Self, MonitorError> {
        shared
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| MonitorError::SessionActive)?;
        Ok(Self { shared })
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.shared.active.store(false, Ordering::Release);
    }
}

async fn run_session(
    guard: ActiveGuard,
    duration: Option<Duration>,
    mut stop_rx: watch::Receiver<bool>,
) -> SessionSummary {
    let shared = &guard.shared;
    let started_at = Utc::now();
    // A deadline beyond the clock's range behaves like no deadline.
    let deadline = duration.and_then(|d| Instant::now().checked_add(d));
    let mut ticks = 0u64;
    let mut samples = 0usize;
    let mut stopped = false;

    loop {
        if *stop_rx.borrow() {
            stopped = true;
            break;
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            break;
        }

        ticks += 1;
        samples += shared.tick(ticks).await.len();

        let wake = match (Instant::now().checked_add(shared.interval), deadline) {
            (Some(next), Some(deadline)) => next.min(deadline),
            (Some(next), None) => next,
            (None, Some(deadline)) => deadline,
            (None, None) => break,
        };
        tokio::select! {
            _ = sleep_until(wake) => {}
            changed = stop_rx.changed() => {
                // A dropped session handle counts as a stop request.
                if changed.is_err() || *stop_rx.borrow() {
                    stopped = true;
                    break;
                }
            }
        }
    }

    let summary = SessionSummary {
        ticks,
        samples,
        started_at,
        finished_at: Utc::now(),
        stopped,
    };
    debug!(ticks, samples, stopped, "monitoring session finished");
    drop(guard);
    summary
}

/// Handle to a running session.
#[derive(Debug)]
pub struct MonitorSession {
    stop: Arc<watch::Sender<bool>>,
    task: JoinHandle<SessionSummary>,
}

impl MonitorSession {
    /// Ask the session to end. Honoured after the in-flight tick, if any.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// Cloneable stop trigger, e.g. for a Ctrl-C handler.
    pub fn stopper(&self) -> Arc<watch::Sender<bool>> {
        self.stop.clone()
    }

    pub async fn join(self) -> Result<SessionSummary, MonitorError> {
        let Self { stop, task } = self;
        let summary = task
            .await
            .map_err(|err| MonitorError::Aborted(err.to_string()))?;
        drop(stop);
        info!(
            ticks = summary.ticks,
            samples = summary.samples,
            stopped = summary.stopped,
            "monitoring session complete"
        );
        Ok(summary)
    }

    pub async fn stop_and_join(self) -> Result<SessionSummary, MonitorError> {
        self.stop();
        self.join().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ServiceStatus;
    use crate::registry::ServiceDefinition;
    use crate::runtime::SimulatedRuntime;

    fn container_loop(interval: Duration) -> (MonitorLoop, Arc<SimulatedRuntime>) {
        let runtime = Arc::new(
            SimulatedRuntime::new()
                .with_container("hcm-redis", true)
                .with_container("neo4j", false),
        );
        let mut registry = ServiceRegistry::new();
        registry
            .register(ServiceDefinition::container("hcm-redis", "hcm-redis"))
            .unwrap();
        registry
            .register(ServiceDefinition::container("neo4j", "neo4j"))
            .unwrap();
        let probe = HealthProbe::new(Some(runtime.clone()), Duration::from_secs(1)).unwrap();
        let monitor = MonitorLoop::new(Arc::new(registry), probe, MetricLog::new(), interval, None);
        (monitor, runtime)
    }

    #[tokio::test]
    async fn run_tick_appends_one_sample_per_service() {
        let (monitor, _runtime) = container_loop(Duration::from_secs(30));
        let batch = monitor.run_tick().await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(monitor.log().len(), 2);
        assert!(!monitor.is_active());

        let neo4j = monitor.log().for_service("neo4j");
        assert_eq!(neo4j[0].status, ServiceStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_bounds_the_tick_count() {
        let (monitor, _runtime) = container_loop(Duration::from_secs(30));
        let session = monitor.start(Some(Duration::from_secs(300))).unwrap();
        let summary = session.join().await.unwrap();
        assert_eq!(summary.ticks, 10);
        assert_eq!(summary.samples, 20);
        assert!(!summary.stopped);
        assert!(!monitor.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn run_tick_is_rejected_during_a_session() {
        let (monitor, _runtime) = container_loop(Duration::from_secs(30));
        let session = monitor.start(None).unwrap();
        assert!(matches!(
            monitor.run_tick().await,
            Err(MonitorError::SessionActive)
        ));
        let summary = session.stop_and_join().await.unwrap();
        assert!(summary.stopped);
        assert!(monitor.run_tick().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn unrepresentable_deadline_runs_until_stopped() {
        let (monitor, _runtime) = container_loop(Duration::from_secs(30));
        let session = monitor.start(Some(Duration::from_secs(u64::MAX))).unwrap();
        tokio::time::sleep(Duration::from_secs(65)).await;
        let summary = session.stop_and_join().await.unwrap();
        assert_eq!(summary.ticks, 3);
        assert!(summary.stopped);
    }
}
