//! Tracing setup for the CLI.
//!
//! # Separation of Concerns
//!
//! - **stderr**: diagnostics filtered by `RUST_LOG` (default `warn`), compact.
//!   Never mixed into stdout, which carries only the JSON report.
//! - **Run log**: `.claude/logs/framework-core/<command>-<stamp>.log`, always at
//!   `info`, plain text. Unaffected by `RUST_LOG`.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::warn;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Path of the run log for `command` started at `started`.
pub fn run_log_path(log_dir: &Path, command: &str, started: DateTime<Utc>) -> PathBuf {
    log_dir.join(format!("{command}-{}.log", started.format("%Y%m%d-%H%M%S")))
}

/// Initialize the global subscriber.
///
/// If the run log cannot be opened, logging continues on stderr only and the
/// failure is reported there.
///
/// # Example
/// ```bash
/// RUST_LOG=framework_core=debug framework-core cold-start
/// ```
pub fn init(run_log: Option<&Path>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .compact()
        .with_filter(filter);

    let (file_layer, open_error) = match run_log.map(open_run_log).transpose() {
        Ok(file) => (
            file.map(|file| {
                fmt::layer()
                    .with_writer(Arc::new(file))
                    .with_ansi(false)
                    .with_target(true)
                    .with_filter(LevelFilter::INFO)
            }),
            None,
        ),
        Err(err) => (None, Some(err)),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    if let Some(err) = open_error {
        warn!(err = %format!("{err:#}"), "run log unavailable, logging to stderr only");
    }
}

fn open_run_log(path: &Path) -> Result<fs::File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open run log {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn run_log_name_uses_command_and_compact_stamp() {
        let started = Utc
            .with_ymd_and_hms(2026, 3, 4, 5, 6, 7)
            .single()
            .expect("timestamp");
        let path = run_log_path(Path::new("/w/.claude/logs/framework-core"), "cold-start", started);
        assert_eq!(
            path,
            PathBuf::from("/w/.claude/logs/framework-core/cold-start-20260304-050607.log")
        );
    }

    #[test]
    fn open_run_log_creates_missing_directories() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("a/b/run.log");
        open_run_log(&path).expect("open");
        assert!(path.exists());
    }
}
