//! Logging initialization.
//!
//! `serve` with `logging.to_file`: logs to `{logging.dir}/broker-{datetime}.log`
//! Everything else: logs to stderr

use anyhow::Result;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

/// Result of logging initialization
pub struct LoggingHandle {
    /// Flushes buffered file output when dropped; keep alive until exit
    pub _guard: Option<WorkerGuard>,

    /// Path to the log file, when logging to a file
    pub log_file_path: Option<PathBuf>,
}

/// Log level to use, `--debug` winning over the configured level
pub fn effective_level(config: &Config, debug_override: bool) -> String {
    if debug_override {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    }
}

/// Whether this invocation should log to a file
pub fn logs_to_file(config: &Config, long_running: bool) -> bool {
    long_running && config.logging.to_file
}

pub fn log_file_name() -> String {
    let timestamp = chrono::Utc::now().format("%Y%m%dT%H%M%SZ");
    format!("broker-{}.log", timestamp)
}

/// Initialize the global subscriber.
///
/// `long_running` is true for the `serve` worker; one-shot commands always
/// log to stderr. `RUST_LOG` overrides the configured level.
pub fn init_logging(
    config: &Config,
    long_running: bool,
    debug_override: bool,
) -> Result<LoggingHandle> {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or(effective_level(config, debug_override)),
    );

    if logs_to_file(config, long_running) {
        let logs_dir = config.logs_path();
        std::fs::create_dir_all(&logs_dir)?;

        let log_filename = log_file_name();
        let log_file_path = logs_dir.join(&log_filename);

        let file_appender = tracing_appender::rolling::never(&logs_dir, &log_filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(non_blocking),
            )
            .init();

        Ok(LoggingHandle {
            _guard: Some(guard),
            log_file_path: Some(log_file_path),
        })
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();

        Ok(LoggingHandle {
            _guard: None,
            log_file_path: None,
        })
    }
}
