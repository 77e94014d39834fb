//! Logging setup.
//!
//! Logs always go to a daily rolling file in the configured log directory. Stdout
//! carries protocol frames in stream mode, so console output goes to stderr and is
//! only allowed alongside the web server.

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServiceConfig;

pub const LOG_FILE_NAME: &str = "dbtoolsservice.log";

/// Filter used when `RUST_LOG` is unset
const DEFAULT_FILTER: &str = "info";

/// Install the global subscriber. Keep the returned guard alive until exit so
/// buffered lines are flushed.
pub fn init(config: &ServiceConfig) -> anyhow::Result<WorkerGuard> {
    let (file_writer, guard) = file_writer(&config.log_dir)?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let console = (config.console_logging && config.enable_web_server).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .with(console)
        .try_init()
        .context("failed to install the tracing subscriber")?;

    Ok(guard)
}

fn file_writer(
    log_dir: &Path,
) -> anyhow::Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;
    let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME);
    Ok(tracing_appender::non_blocking(appender))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_writer_creates_log_directory() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("nested").join("logs");

        let (_writer, guard) = file_writer(&log_dir).unwrap();
        assert!(log_dir.is_dir());
        drop(guard);
    }
}
