//! File logging.
//!
//! Logs go to `~/.local/state/sessiontree/sessiontree.log`, rotated daily.
//! The terminal is owned by the TUI, so nothing is ever written to stderr.

use crate::config::Config;
use std::io;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Keeps the non-blocking writer alive; flushes pending lines when dropped.
pub struct LoggingGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Sets up the file subscriber. `RUST_LOG` takes precedence over `level`.
pub fn init(level: &str) -> io::Result<LoggingGuard> {
    let log_dir = Config::state_dir();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, Config::log_file_name());
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_names(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .try_init()
        .map_err(io::Error::other)?;

    tracing::info!(log_dir = %log_dir.display(), level, "logging initialized");

    Ok(LoggingGuard { _guard: guard })
}

/// Routes tracing output through the test harness.
#[cfg(test)]
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
