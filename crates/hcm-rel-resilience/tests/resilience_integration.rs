//! ---
//! hcm_section: "03-fault-tolerance"
//! hcm_subsection: "tests"
//! hcm_type: "source"
//! hcm_scope: "code"
//! hcm_description: "End-to-end fault-tolerance campaign against a simulated runtime."
//! hcm_version: "v0.1.0"
//! hcm_owner: "tbd"
//! ---
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use hcm_rel_common::config::CampaignConfig;
use hcm_rel_core::{
    HealthProbe, MetricLog, MonitorLoop, ServiceDefinition, ServiceRegistry, ServiceStatus,
    SimulatedRuntime, StartBehaviour,
};
use hcm_rel_metrics::new_registry;
use hcm_rel_resilience::{
    FaultInjector, FaultPlan, FaultToleranceCampaign, InjectionStatus, RecoveryOutcome,
    RecoveryPolicy, ResilienceMetrics,
};

const INFRA: [&str; 3] = ["hcm-redis", "neo4j", "hcm-postgres"];

struct Fixture {
    runtime: Arc<SimulatedRuntime>,
    campaign: FaultToleranceCampaign,
}

fn fixture(metrics: Option<ResilienceMetrics>) -> Fixture {
    let runtime = Arc::new(SimulatedRuntime::new());
    let mut registry = ServiceRegistry::new();
    for name in INFRA {
        runtime.insert(name, true);
        registry
            .register(ServiceDefinition::container(name, name))
            .unwrap();
    }
    let registry = Arc::new(registry);
    let probe = HealthProbe::new(Some(runtime.clone()), Duration::from_secs(10)).unwrap();
    let monitor = MonitorLoop::new(
        registry.clone(),
        probe,
        MetricLog::new(),
        Duration::from_secs(30),
        None,
    );
    let injector = Arc::new(FaultInjector::new(
        registry,
        Some(runtime.clone()),
        RecoveryPolicy::default(),
        metrics,
    ));
    let config = CampaignConfig {
        baseline: Duration::from_secs(60),
        observation: Duration::from_secs(60),
    };
    Fixture {
        campaign: FaultToleranceCampaign::new(monitor, injector, &config),
        runtime,
    }
}

#[tokio::test(start_paused = true)]
async fn campaign_runs_monitor_inject_recover_sequence() {
    let registry = new_registry();
    let metrics = ResilienceMetrics::new(registry.clone()).unwrap();
    let Fixture { runtime, campaign } = fixture(Some(metrics));

    let plan: FaultPlan = r#"
        [[scenarios]]
        name = "database"
        description = "Redis cache stopped"
        targets = ["hcm-redis"]
        type = "stop"
        duration_secs = 120
        severity = "major"
    "#
    .parse()
    .unwrap();

    let report = campaign.run(&plan).await.unwrap();
    assert_eq!(report.scenarios.len(), 1);
    let run = &report.scenarios[0];
    assert_eq!(run.baseline.ticks, 2);
    assert_eq!(run.during_fault.ticks, 4);
    assert_eq!(run.post_recovery.as_ref().unwrap().ticks, 2);
    assert!(!report.interrupted);
    assert_eq!(run.injection.targets[0].status, InjectionStatus::Applied);
    assert_eq!(
        run.recovery.targets[0].outcome,
        RecoveryOutcome::Restored {
            waited: Duration::from_secs(5)
        }
    );
    assert_eq!(report.mean_restore_time(), Some(Duration::from_secs(5)));
    assert!(report.all_restored());
    assert_eq!(runtime.call_counts("hcm-redis"), (1, 1));

    // Four failed samples out of eight ticks for redis; the other stores stay healthy.
    let log = campaign.monitor().log();
    let redis = log.for_service("hcm-redis");
    assert_eq!(redis.len(), 8);
    let failed = redis
        .iter()
        .filter(|sample| sample.status == ServiceStatus::Failed)
        .count();
    assert_eq!(failed, 4);
    assert_eq!(redis.last().unwrap().status, ServiceStatus::Healthy);
    assert!((report.reliability.per_service_availability["hcm-redis"] - 0.5).abs() < 1e-9);
    assert!((report.reliability.per_service_availability["neo4j"] - 1.0).abs() < 1e-9);

    let timestamps: Vec<_> = log.snapshot().iter().map(|sample| sample.timestamp).collect();
    assert!(timestamps.windows(2).all(|pair| pair[0] <= pair[1]));

    let families = registry.gather();
    let injected = families
        .iter()
        .find(|family| family.get_name() == "hcm_rel_faults_injected_total")
        .unwrap();
    assert_eq!(injected.get_metric()[0].get_counter().get_value(), 1.0);
}

#[tokio::test(start_paused = true)]
async fn recovery_timeout_is_reported_and_campaign_continues() {
    let Fixture { runtime, campaign } = fixture(None);
    runtime.set_start_behaviour("neo4j", StartBehaviour::Stuck);

    let plan: FaultPlan = r#"
        [[scenarios]]
        name = "graph-down"
        targets = ["neo4j"]
        type = "stop"
        duration_secs = 30
        severity = "major"

        [[scenarios]]
        name = "cache-stress"
        targets = ["hcm-redis"]
        type = "stress"
        duration_secs = 30
        severity = "minor"
    "#
    .parse()
    .unwrap();

    let report = campaign.run(&plan).await.unwrap();
    assert_eq!(report.scenarios.len(), 2);
    assert_eq!(
        report.scenarios[0].recovery.targets[0].outcome,
        RecoveryOutcome::TimedOut
    );
    assert_eq!(
        report.scenarios[1].recovery.targets[0].outcome,
        RecoveryOutcome::NotRequired
    );
    assert!(!report.all_restored());
    assert_eq!(report.mean_restore_time(), None);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(
        json["scenarios"][0]["recovery"]["targets"][0]["outcome"],
        "timed_out"
    );
    assert!(json["mean_restore_time_secs"].is_null());
}

#[tokio::test(start_paused = true)]
async fn shutdown_during_fault_window_restores_targets_and_stops() {
    let Fixture { runtime, campaign } = fixture(None);
    let plan: FaultPlan = r#"
        [[scenarios]]
        name = "cache-down"
        targets = ["hcm-redis"]
        type = "stop"
        duration_secs = 120
        severity = "major"

        [[scenarios]]
        name = "graph-down"
        targets = ["neo4j"]
        type = "stop"
        duration_secs = 120
        severity = "major"
    "#
    .parse()
    .unwrap();

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let started = tokio::time::Instant::now();
    let (report, ()) = tokio::join!(campaign.run_with_shutdown(&plan, shutdown_rx), async {
        // 60 s baseline, then 30 s into the fault window
        tokio::time::sleep(Duration::from_secs(90)).await;
        shutdown_tx.send_replace(true);
    });
    let report = report.unwrap();

    assert!(report.interrupted);
    assert_eq!(report.scenarios.len(), 1);
    let run = &report.scenarios[0];
    assert!(run.during_fault.stopped);
    assert!(run.post_recovery.is_none());
    assert!(run.recovery.all_restored());
    assert!(started.elapsed() < Duration::from_secs(120));

    assert_eq!(runtime.is_running("hcm-redis"), Some(true));
    assert_eq!(runtime.call_counts("hcm-redis"), (1, 1));
    assert_eq!(runtime.call_counts("neo4j"), (0, 0));
    assert!(!campaign.monitor().is_active());
}

#[tokio::test]
async fn plan_file_loads_from_disk() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
        [[scenarios]]
        name = "multi-service"
        targets = ["hcm-matching-engine", "hcm-verification"]
        type = "stop"
        duration_secs = 240
        severity = "critical"
        "#
    )
    .unwrap();

    let plan = FaultPlan::from_file(file.path()).unwrap();
    assert_eq!(plan.scenarios[0].targets.len(), 2);
    assert_eq!(plan.scenarios[0].duration, Duration::from_secs(240));
}

#[test]
fn shipped_plan_reproduces_default_scenarios() {
    let plan: FaultPlan = include_str!("../../../configs/faults.example.toml")
        .parse()
        .unwrap();
    let names: Vec<_> = plan.iter().map(|scenario| scenario.name.as_str()).collect();
    assert_eq!(
        names,
        ["single-service-failure", "database-failure", "multi-service-failure"]
    );
    assert_eq!(plan.scenarios[1].targets, ["hcm-redis"]);
    assert_eq!(plan.scenarios[2].duration, Duration::from_secs(240));
}
