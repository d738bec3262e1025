//! Tracing setup for the dockchat binaries.
//!
//! Logs go to a daily-rolling file so stdout/stderr stay owned by the
//! renderer. `RUST_LOG` overrides the default filter.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "warn,dockchat=info,dockchat_core=info";
const LOG_FILE_PREFIX: &str = "dockchat.log";

/// Installs the global subscriber writing to `log_dir`.
///
/// The returned guard flushes buffered lines on drop; keep it alive for the
/// lifetime of the process. A second call is a no-op apart from the guard.
pub fn init(log_dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("create log directory {}", log_dir.display()))?;

    let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let _ = tracing_subscriber::fmt()
        // Fall back to the default filter if RUST_LOG is unset or invalid
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        )
        .with_ansi(false)
        .with_writer(writer)
        .try_init();

    Ok(guard)
}
