//! ---
//! hcm_section: "01-core-functionality"
//! hcm_subsection: "module"
//! hcm_type: "source"
//! hcm_scope: "code"
//! hcm_description: "Shared primitives and utilities for the reliability harness."
//! hcm_version: "v0.1.0"
//! hcm_owner: "tbd"
//! ---
//! Tracing setup for harness binaries.
//!
//! Every run writes to stdout in the configured format and, unless disabled,
//! to a JSON log file named after the binary and the command being run, so a
//! fault-injection campaign and a monitoring session never share a file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::Registry;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

/// Filter override checked before `RUST_LOG`.
pub const LOG_ENV: &str = "HCM_REL_LOG";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Stdout rendering of log events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    StructuredJson,
    #[default]
    Pretty,
    /// One line per event, for watching long monitoring sessions.
    Compact,
}

/// How often the log file is rolled over.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Hourly,
    #[default]
    Daily,
    Never,
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

/// Keeps the background log writers alive; drop it only when the process is done logging.
#[must_use = "dropping the guard stops log output"]
#[derive(Debug)]
pub struct LogGuard {
    _stdout: WorkerGuard,
    _file: Option<WorkerGuard>,
}

/// File name prefix for one run, e.g. `hcm-relctl-fault-test`.
pub fn log_file_prefix(config: &LoggingConfig, binary: &str, command: &str) -> String {
    let base = config.file_prefix.as_deref().unwrap_or(binary);
    if command.is_empty() {
        base.to_owned()
    } else {
        format!("{base}-{command}")
    }
}

/// Filter directive in effect: `HCM_REL_LOG`, then `RUST_LOG`, then the configured level.
pub fn filter_directive(config: &LoggingConfig) -> String {
    [LOG_ENV, EnvFilter::DEFAULT_ENV]
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|value| !value.trim().is_empty())
        .unwrap_or_else(|| config.level.clone())
}

fn build_filter(config: &LoggingConfig) -> EnvFilter {
    let directive = filter_directive(config);
    EnvFilter::try_new(&directive).unwrap_or_else(|err| {
        eprintln!("invalid log filter '{directive}' ({err}); using '{}'", config.level);
        EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"))
    })
}

fn stdout_layer(format: LogFormat, writer: NonBlocking) -> BoxedLayer {
    let layer = fmt::layer().with_timer(fmt::time::UtcTime::rfc_3339());
    match format {
        LogFormat::StructuredJson => layer.json().with_target(false).with_writer(writer).boxed(),
        LogFormat::Pretty => layer.with_target(true).with_writer(writer).boxed(),
        LogFormat::Compact => layer.compact().with_target(false).with_writer(writer).boxed(),
    }
}

fn file_layer(config: &LoggingConfig, prefix: &str) -> Result<Option<(BoxedLayer, WorkerGuard)>> {
    if !config.file {
        return Ok(None);
    }
    std::fs::create_dir_all(&config.directory).with_context(|| {
        format!("failed to create log directory {}", config.directory.display())
    })?;
    let appender = RollingFileAppender::builder()
        .rotation(config.rotation.into())
        .filename_prefix(prefix)
        .filename_suffix("log")
        .build(&config.directory)
        .context("failed to open log file")?;
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer = fmt::layer()
        .json()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_writer(writer)
        .boxed();
    Ok(Some((layer, guard)))
}

/// Install the global subscriber for `binary` running `command`.
///
/// A subscriber installed earlier (tests, embedding) is left in place.
pub fn init_tracing(binary: &str, command: &str, config: &LoggingConfig) -> Result<LogGuard> {
    let prefix = log_file_prefix(config, binary, command);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let mut layers = vec![stdout_layer(config.format, stdout_writer)];
    let file_guard = match file_layer(config, &prefix)? {
        Some((layer, guard)) => {
            layers.push(layer);
            Some(guard)
        }
        None => None,
    };

    let _ = tracing_subscriber::registry()
        .with(layers)
        .with(build_filter(config))
        .try_init();

    info!(
        binary,
        command,
        log_dir = %config.directory.display(),
        log_file = config.file.then_some(prefix.as_str()),
        format = ?config.format,
        "tracing initialised"
    );
    Ok(LogGuard {
        _stdout: stdout_guard,
        _file: file_guard,
    })
}
