//! Logging setup
//!
//! Console output plus a JSON log file rotated daily. `RUST_LOG` overrides
//! the configured level. Old log files beyond the configured count are
//! removed at startup.

use std::fs;
use std::path::Path;
use std::sync::Once;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{CkmanError, Result};

static INIT: Once = Once::new();
const LOG_PREFIX: &str = "ckman";

/// Install the global subscriber. Only the first call has any effect.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let mut result = Ok(());
    INIT.call_once(|| result = install(config));
    result
}

fn install(config: &LoggingConfig) -> Result<()> {
    fs::create_dir_all(&config.dir)?;
    cleanup_old_logs(&config.dir, config.files_to_keep);

    let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix(LOG_PREFIX)
        .filename_suffix("log")
        .build(&config.dir)
        .map_err(|e| CkmanError::Config(format!("failed to create log appender: {}", e)))?;

    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let console = config.console.then(|| {
        fmt::Layer::new()
            .with_target(true)
            .with_ansi(true)
            .with_filter(filter())
    });

    let subscriber = tracing_subscriber::registry().with(console).with(
        fmt::Layer::new()
            .json()
            .with_writer(file_appender)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .with_target(true)
            .with_ansi(false)
            .with_filter(filter()),
    );

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| CkmanError::Config(format!("failed to set tracing subscriber: {}", e)))
}

fn cleanup_old_logs(log_dir: &Path, keep: usize) {
    let Ok(entries) = fs::read_dir(log_dir) else {
        return;
    };
    let mut log_files: Vec<_> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry.file_name().to_string_lossy().starts_with(LOG_PREFIX)
                && entry.path().extension().map(|ext| ext == "log").unwrap_or(false)
        })
        .collect();

    // newest first
    log_files.sort_by_key(|entry| {
        std::cmp::Reverse(
            entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH),
        )
    });

    for old_file in log_files.iter().skip(keep) {
        let _ = fs::remove_file(old_file.path());
    }
}
