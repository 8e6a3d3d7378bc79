//! Tracing subscriber setup.
//!
//! Console output goes to stderr so command output on stdout stays clean.
//! Audit lines use the `orderflow::audit` target and can be filtered on their own.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LogFormat, LoggingSection};

pub const LOG_FILE_PREFIX: &str = "orderflow.log";

/// Keeps the file writer flushing. Drop it only at process exit.
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Pick the filter directive: `RUST_LOG`, then the configured filter, then a
/// level derived from `verbose`.
pub fn filter_directive(env: Option<String>, configured: Option<&str>, verbose: bool) -> String {
    env.filter(|v| !v.trim().is_empty())
        .or_else(|| configured.map(str::to_string))
        .unwrap_or_else(|| {
            if verbose {
                "orderflow=debug,info".to_string()
            } else {
                "info".to_string()
            }
        })
}

fn build_filter(directive: &str) -> EnvFilter {
    EnvFilter::try_new(directive).unwrap_or_else(|e| {
        eprintln!("Ignoring invalid log filter '{}': {}", directive, e);
        EnvFilter::new("info")
    })
}

/// Install the global subscriber.
pub fn init(config: &LoggingSection, log_dir: Option<&Path>, verbose: bool) -> Result<LoggingGuard> {
    let directive = filter_directive(
        std::env::var("RUST_LOG").ok(),
        config.filter.as_deref(),
        verbose,
    );

    let (json_layer, pretty_layer) = match config.format {
        LogFormat::Json => (
            Some(fmt::layer().json().with_writer(std::io::stderr)),
            None,
        ),
        LogFormat::Pretty => (
            None,
            Some(fmt::layer().with_target(verbose).with_writer(std::io::stderr)),
        ),
    };

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().json().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(build_filter(&directive))
        .with(json_layer)
        .with(pretty_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(LoggingGuard { _file: guard })
}
