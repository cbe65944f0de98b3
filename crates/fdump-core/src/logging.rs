//! Logging configuration using tracing

use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::Result;

const LOG_FILE_NAME: &str = "fdump.log";

/// Initialize the logging subsystem
///
/// Every step of a dump is written to `~/.local/share/flutter-dump/logs/`,
/// and progress is mirrored to stderr. Log level is controlled by the
/// `FDUMP_LOG` environment variable; `verbose` lowers the default to `debug`.
///
/// # Examples
/// ```bash
/// FDUMP_LOG=debug fdump ./my_app
/// FDUMP_LOG=fdump_daemon=trace fdump ./my_app
/// ```
pub fn init(verbose: bool) -> Result<PathBuf> {
    let log_dir = get_log_directory()?;
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_NAME);

    let default_directives = if verbose {
        "fdump=debug,warn"
    } else {
        "fdump=info,warn"
    };
    let env_filter =
        EnvFilter::try_from_env("FDUMP_LOG").unwrap_or_else(|_| EnvFilter::new(default_directives));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true)
                .with_timer(fmt::time::ChronoLocal::new(
                    "%Y-%m-%d %H:%M:%S%.3f".to_string(),
                )),
        )
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .without_time()
                .compact(),
        )
        .init();

    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("flutter-dump starting");
    tracing::info!("Log directory: {}", log_dir.display());
    tracing::info!("═══════════════════════════════════════════════════════");

    Ok(log_dir)
}

/// Get the log directory path
fn get_log_directory() -> Result<PathBuf> {
    let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    Ok(base.join("flutter-dump").join("logs"))
}
