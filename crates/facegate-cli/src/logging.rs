//! Tracing setup.
//!
//! Plain commands log to stderr. Interactive commands own the terminal, so
//! their logs go to a daily-rolling file instead.
//!
//! The level is read from `FACEGATE_LOG` (default `info`).

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("FACEGATE_LOG").unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn init_stderr() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Fails without installing a subscriber when `log_dir` cannot be created.
pub fn init_file(log_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(log_dir, "facegate.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    // Keep the writer alive for the rest of the process.
    let _ = GUARD.set(guard);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    tracing::info!(dir = %log_dir.display(), "logging to file");
    Ok(())
}
