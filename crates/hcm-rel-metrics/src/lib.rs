//! ---
//! hcm_section: "03-observability"
//! hcm_subsection: "module"
//! hcm_type: "source"
//! hcm_scope: "code"
//! hcm_description: "Metrics collection and export utilities."
//! hcm_version: "v0.1.0"
//! hcm_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    GaugeVec, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across the harness.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let bound = std_listener
        .local_addr()
        .with_context(|| "failed to read metrics listener address")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %bound, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

/// Prometheus scrape endpoint.
async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain"),
                )],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Return the bound address (resolved when an ephemeral port was requested).
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the monitoring loop.
#[derive(Clone)]
pub struct MonitorMetrics {
    registry: SharedRegistry,
    ticks_total: IntCounter,
    samples_total: IntCounterVec,
    probe_latency_seconds: HistogramVec,
    availability: GaugeVec,
}

impl MonitorMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let ticks_total = IntCounter::with_opts(Opts::new(
            "hcm_rel_monitor_ticks_total",
            "Completed monitoring ticks across all sessions",
        ))?;
        registry.register(Box::new(ticks_total.clone()))?;

        let samples_total = IntCounterVec::new(
            Opts::new(
                "hcm_rel_probe_samples_total",
                "Health samples recorded by service and classified status",
            ),
            &["service", "status"],
        )?;
        registry.register(Box::new(samples_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 15)
            .context("failed to construct histogram buckets")?;
        let probe_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "hcm_rel_probe_latency_seconds",
                "Observed health endpoint response time",
            )
            .buckets(buckets),
            &["service"],
        )?;
        registry.register(Box::new(probe_latency_seconds.clone()))?;

        let availability = GaugeVec::new(
            Opts::new(
                "hcm_rel_service_availability",
                "Availability ratio of the most recent sample per service",
            ),
            &["service"],
        )?;
        registry.register(Box::new(availability.clone()))?;

        Ok(Self {
            registry,
            ticks_total,
            samples_total,
            probe_latency_seconds,
            availability,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_tick(&self) {
        self.ticks_total.inc();
    }

    /// Record one classified sample. A zero latency means "not measured" and is skipped.
    pub fn observe_sample(&self, service: &str, status: &str, latency: Duration, availability: f64) {
        self.samples_total
            .with_label_values(&[service, status])
            .inc();
        if !latency.is_zero() {
            self.probe_latency_seconds
                .with_label_values(&[service])
                .observe(latency.as_secs_f64());
        }
        self.availability
            .with_label_values(&[service])
            .set(availability);
    }
}

impl std::fmt::Debug for MonitorMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorMetrics").finish_non_exhaustive()
    }
}

pub use prometheus;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monitor_metrics_register_families() {
        let registry = new_registry();
        let metrics = MonitorMetrics::new(registry.clone()).unwrap();
        metrics.inc_tick();
        metrics.observe_sample("hcm-redis", "healthy", Duration::ZERO, 1.0);
        metrics.observe_sample("hcm-api-gateway", "failed", Duration::from_millis(12), 0.0);

        let names: Vec<_> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"hcm_rel_monitor_ticks_total".to_string()));
        assert!(names.contains(&"hcm_rel_probe_samples_total".to_string()));
        assert!(names.contains(&"hcm_rel_probe_latency_seconds".to_string()));
        assert!(names.contains(&"hcm_rel_service_availability".to_string()));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = new_registry();
        MonitorMetrics::new(registry.clone()).unwrap();
        assert!(MonitorMetrics::new(registry).is_err());
    }

    #[tokio::test]
    async fn exporter_serves_registry() {
        let registry = new_registry();
        let metrics = MonitorMetrics::new(registry.clone()).unwrap();
        metrics.inc_tick();

        let server = spawn_http_server(registry, "127.0.0.1:0".parse().unwrap()).unwrap();
        let url = format!("http://{}/metrics", server.addr());
        let body = reqwest::get(url).await.unwrap().text().await.unwrap();
        assert!(body.contains("hcm_rel_monitor_ticks_total 1"));
        server.shutdown().await.unwrap();
    }
}
