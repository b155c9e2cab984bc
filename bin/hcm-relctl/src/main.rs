//! ---
//! hcm_section: "04-operator-interfaces"
//! hcm_subsection: "binary"
//! hcm_type: "source"
//! hcm_scope: "code"
//! hcm_description: "Control CLI for health checks, monitoring and fault-tolerance runs."
//! hcm_version: "v0.1.0"
//! hcm_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hcm_rel_common::config::{AppConfig, LoadedAppConfig};
use hcm_rel_common::logging::init_tracing;
use hcm_rel_core::{AvailabilityBand, Harness, ReliabilityReport};
use hcm_rel_metrics::{new_registry, spawn_http_server, SharedRegistry};
use hcm_rel_resilience::{
    CampaignReport, FaultInjector, FaultPlan, FaultToleranceCampaign, RecoveryPolicy,
    ResilienceMetrics,
};
use serde_json::json;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

const DEFAULT_CONFIG_CANDIDATES: [&str; 2] = ["configs/harness.toml", "configs/harness.example.toml"];

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "HCM reliability harness: health checks, monitoring and fault-tolerance testing",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", global = true, help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Probe every service once and print the samples and report")]
    Check,
    #[command(about = "Run a monitoring session and print the reliability report")]
    Monitor {
        #[arg(
            long,
            value_name = "N",
            default_value_t = 30,
            help = "Session length in minutes; Ctrl-C stops earlier"
        )]
        minutes: u64,
    },
    #[command(about = "Run the fault-tolerance campaign described by a plan file")]
    FaultTest {
        #[arg(long, value_name = "FILE", help = "TOML fault plan with [[scenarios]]")]
        plan: PathBuf,
    },
}

impl Commands {
    /// Subcommand name, used to keep one log file per kind of run.
    fn name(&self) -> &'static str {
        match self {
            Commands::Check => "check",
            Commands::Monitor { .. } => "monitor",
            Commands::FaultTest { .. } => "fault-test",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let loaded = match &cli.config {
        Some(path) => LoadedAppConfig {
            config: AppConfig::from_path(path)?,
            source: Some(path.clone()),
        },
        None => AppConfig::load_with_source(&DEFAULT_CONFIG_CANDIDATES)?,
    };
    let config = loaded.config;
    let _logging = init_tracing("hcm-relctl", cli.command.name(), &config.logging)?;
    match &loaded.source {
        Some(path) => info!(config_path = %path.display(), "configuration loaded"),
        None => info!("no configuration file found; using built-in defaults"),
    }

    let metrics_registry = config.metrics.enabled.then(new_registry);
    let metrics_server = match &metrics_registry {
        Some(registry) => {
            info!(address = %config.metrics.listen, "metrics exporter enabled");
            Some(spawn_http_server(registry.clone(), config.metrics.listen)?)
        }
        None => None,
    };

    let harness = Harness::from_config(&config, metrics_registry.clone()).await?;
    let outcome = match cli.command {
        Commands::Check => run_check(&harness).await,
        Commands::Monitor { minutes } => {
            run_monitor(&harness, Duration::from_secs(minutes.saturating_mul(60))).await
        }
        Commands::FaultTest { plan } => {
            run_fault_test(&harness, &config, &plan, metrics_registry).await
        }
    };

    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    outcome
}

async fn run_check(harness: &Harness) -> Result<()> {
    let samples = harness.monitor().run_tick().await?;
    let report = harness.log().report();
    summarize(&report);
    print_json(&json!({ "samples": samples, "report": report }))
}

async fn run_monitor(harness: &Harness, duration: Duration) -> Result<()> {
    let session = harness.monitor().start(Some(duration))?;
    let stopper = session.stopper();
    let ctrl_c = tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received; stopping after the current tick");
            stopper.send_replace(true);
        }
    });

    let summary = session.join().await?;
    ctrl_c.abort();
    let report = harness.log().report();
    summarize(&report);
    print_json(&json!({ "session": summary, "report": report }))
}

async fn run_fault_test(
    harness: &Harness,
    config: &AppConfig,
    plan_path: &Path,
    metrics: Option<SharedRegistry>,
) -> Result<()> {
    let plan = FaultPlan::from_file(plan_path)?;
    if plan.is_empty() {
        warn!(plan = %plan_path.display(), "fault plan has no scenarios");
    }
    if harness.runtime().is_none() {
        warn!("no container runtime; stop faults will be recorded as unapplied");
    }

    let resilience_metrics = match metrics {
        Some(registry) => Some(
            ResilienceMetrics::new(registry).context("failed to register resilience metrics")?,
        ),
        None => None,
    };
    let injector = Arc::new(FaultInjector::new(
        harness.registry(),
        harness.runtime(),
        RecoveryPolicy::from(&config.recovery),
        resilience_metrics,
    ));
    let campaign =
        FaultToleranceCampaign::new(harness.monitor().clone(), injector, &config.campaign);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ctrl_c = tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("ctrl-c received; recovering injected faults before exit");
            shutdown_tx.send_replace(true);
        }
    });
    let report = campaign.run_with_shutdown(&plan, shutdown_rx).await;
    ctrl_c.abort();
    let report = report?;
    summarize_campaign(&report);
    summarize(&report.reliability);
    print_json(&report)
}

fn summarize(report: &ReliabilityReport) {
    for (service, availability) in &report.per_service_availability {
        let band = AvailabilityBand::classify(*availability);
        info!(
            service = %service,
            availability_pct = availability * 100.0,
            band = band.as_str(),
            "service availability"
        );
    }
    info!(
        overall_availability_pct = report.overall_availability * 100.0,
        reliability_score = report.reliability_score,
        avg_response_time_ms = report.avg_response_time_ms,
        mttr_minutes = report.mttr_minutes(),
        mtbf_hours = report.mtbf_hours(),
        observed_hours = report.observed_hours(),
        meets_sla = report.meets_sla(),
        samples = report.sample_count,
        "reliability summary"
    );
}

fn summarize_campaign(report: &CampaignReport) {
    for run in &report.scenarios {
        for target in &run.recovery.targets {
            info!(
                scenario = %run.injection.scenario,
                service = %target.service,
                outcome = target.outcome.as_str(),
                "recovery outcome"
            );
        }
    }
    if report.interrupted {
        warn!(
            completed = report.scenarios.len(),
            "campaign interrupted; remaining scenarios were skipped"
        );
    }
    if let Some(mean) = report.mean_restore_time() {
        info!(mean_restore_secs = mean.as_secs_f64(), "measured restore time");
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to render report")?;
    println!("{}", rendered);
    Ok(())
}
