use std::fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing::Subscriber;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("jobs_etl=info,warn"))
}

/// Console-only subscriber for use before the configured one is installed
pub fn bootstrap_subscriber() -> impl Subscriber + Send + Sync {
    tracing_subscriber::registry()
        .with(default_filter())
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
}

/// Initializes the logging system with both console and file output.
///
/// The console gets human-readable lines, the log directory gets daily-rotated
/// JSON. `RUST_LOG` overrides the default filter. Keep the returned guard
/// alive until exit so buffered file logs are flushed.
pub fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let env_filter = default_filter();

    if let Err(e) = fs::create_dir_all(&config.directory) {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
        tracing::warn!(
            directory = %config.directory.display(),
            "Could not create log directory, file logging disabled: {}",
            e
        );
        return None;
    }

    let file_appender = tracing_appender::rolling::daily(&config.directory, &config.file_prefix);
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = fmt::layer().json().with_writer(non_blocking_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .init();

    Some(guard)
}
