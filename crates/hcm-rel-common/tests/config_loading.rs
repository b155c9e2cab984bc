//! ---
//! hcm_section: "01-core-functionality"
//! hcm_subsection: "tests"
//! hcm_type: "source"
//! hcm_scope: "code"
//! hcm_description: "Configuration discovery integration tests."
//! hcm_version: "v0.1.0"
//! hcm_owner: "tbd"
//! ---
use std::fs;
use std::time::Duration;

use hcm_rel_common::config::{AppConfig, ServiceKind};
use tempfile::tempdir;

#[test]
fn first_existing_candidate_wins() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("missing.toml");
    let present = dir.path().join("harness.toml");
    fs::write(
        &present,
        r#"
        [recovery]
        poll_interval_secs = 2
        max_wait_secs = 20

        [[services]]
        name = "hcm-redis"
        kind = "container"
        "#,
    )
    .unwrap();

    let loaded = AppConfig::load_with_source(&[missing, present.clone()]).unwrap();
    assert_eq!(loaded.source.as_deref(), Some(present.as_path()));
    assert_eq!(loaded.config.recovery.poll_interval, Duration::from_secs(2));
    assert_eq!(loaded.config.services[0].kind, ServiceKind::Container);
}

#[test]
fn falls_back_to_defaults_without_candidates() {
    let dir = tempdir().unwrap();
    let loaded = AppConfig::load_with_source(&[dir.path().join("absent.toml")]).unwrap();
    assert!(loaded.source.is_none());
    assert_eq!(loaded.config.monitor.interval, Duration::from_secs(30));
}

#[test]
fn invalid_file_reports_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    fs::write(&path, "[recovery]\npoll_interval_secs = 10\nmax_wait_secs = 5\n").unwrap();
    let err = AppConfig::from_path(&path).unwrap_err();
    assert!(format!("{err:#}").contains("max_wait_secs"));
}

#[test]
fn shipped_example_config_is_valid() {
    let config: AppConfig = include_str!("../../../configs/harness.example.toml")
        .parse()
        .unwrap();
    assert!(config.runtime.enabled);
    assert_eq!(config.runtime.endpoint.as_str(), "http://localhost:2375/");
    assert_eq!(config.campaign.baseline, Duration::from_secs(300));
    assert!(config.services.is_empty());
}
