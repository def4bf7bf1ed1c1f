//! Logging setup for agentpair using tracing.

use anyhow::Result;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging with a daily file appender and console output.
///
/// The returned guard must be held until exit or buffered file lines are lost.
pub fn init() -> Result<(WorkerGuard, PathBuf)> {
    let log_dir = get_log_dir()?;
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "agentpair.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,agentpair=debug"));

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    tracing::debug!("Log directory: {}", log_dir.display());

    Ok((guard, log_dir))
}

fn get_log_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("com", "agentpair", "agentpair")
        .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;

    Ok(dirs.data_dir().join("logs"))
}

/// Console-only logging for tests. Safe to call from every test.
#[cfg(test)]
pub fn init_test() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_test_writer())
        .try_init();
}
