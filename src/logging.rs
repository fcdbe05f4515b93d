//! Tracing subscriber setup.
//!
//! The filter comes from `TASKDECK_LOG`, then `RUST_LOG`, then a per-mode default. In TUI
//! mode the terminal belongs to the UI, so logs go to a file under the data directory.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "TASKDECK_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    /// Text mode: warnings to stderr alongside progress lines.
    Stderr,
    /// JSON/silent mode: errors only, so stdout stays machine-readable.
    Quiet,
    /// TUI mode: append to the log file.
    File,
}

impl LogTarget {
    fn default_directive(self) -> &'static str {
        match self {
            LogTarget::Stderr => "warn",
            LogTarget::Quiet => "error",
            LogTarget::File => "taskdeck=info",
        }
    }
}

fn env_filter(target: LogTarget) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(target.default_directive()))
}

/// `<data_dir>/taskdeck/taskdeck.log`, or the working directory as a fallback.
pub fn log_path() -> PathBuf {
    match dirs::data_dir() {
        Some(dir) => dir.join("taskdeck").join("taskdeck.log"),
        None => PathBuf::from("taskdeck.log"),
    }
}

/// Install the global subscriber. Returns the log file path in `File` mode.
pub fn init(target: LogTarget) -> Result<Option<PathBuf>> {
    let filter = env_filter(target);
    match target {
        LogTarget::Stderr | LogTarget::Quiet => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .try_init()
                .map_err(|e| anyhow::anyhow!(e))
                .context("install stderr logger")?;
            Ok(None)
        }
        LogTarget::File => {
            let path = log_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create log directory {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .try_init()
                .map_err(|e| anyhow::anyhow!(e))
                .context("install file logger")?;
            tracing::info!("=== taskdeck session started ===");
            Ok(Some(path))
        }
    }
}
