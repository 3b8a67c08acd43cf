//! Logging Module
//!
//! Structured logging to a daily log file, mirrored to stderr in debug
//! builds. `RUST_LOG` overrides the default filter.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// File name prefix of the daily log files
pub const LOG_FILE_NAME: &str = "soberup.log";

/// Install the global subscriber writing under `log_dir`.
///
/// Keep the returned guard alive until exit; dropping it flushes the file
/// writer.
pub fn init(log_dir: &Path) -> WorkerGuard {
    let _ = std::fs::create_dir_all(log_dir);

    let appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE_NAME);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_writer(file_writer);

    #[cfg(debug_assertions)]
    let console_layer = Some(
        fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .pretty(),
    );

    #[cfg(not(debug_assertions))]
    let console_layer: Option<fmt::Layer<_>> = None;

    let subscriber = tracing_subscriber::registry()
        .with(default_filter())
        .with(file_layer)
        .with(console_layer);

    // A subscriber installed earlier (tests, embedding apps) wins.
    let _ = tracing::subscriber::set_global_default(subscriber);
    guard
}

fn default_filter() -> EnvFilter {
    let fallback = if cfg!(debug_assertions) {
        "debug,hyper=warn,reqwest=warn"
    } else {
        "info,hyper=warn,reqwest=warn"
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}
