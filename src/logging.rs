//! File logging for the terminal UI.
//!
//! The terminal belongs to the grid while the app runs, so logs only go to a
//! daily-rolling file. Filter with `RUST_LOG` (default `info`), e.g.
//! `RUST_LOG=cellgrid::controller=debug`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_FILE: &str = "cellgrid.log";

pub fn default_log_dir() -> PathBuf {
    std::env::temp_dir().join("cellgrid-logs")
}

pub fn init(log_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_line_number(true),
        )
        .try_init()
        .context("installing tracing subscriber")?;
    Ok(())
}
