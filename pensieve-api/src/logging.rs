///! Logging configuration module
///! Provides structured logging with console and optional rolling file output

use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Initialize logging based on configuration.
///
/// Returns the worker guard for the file appender when file logging is
/// enabled; the guard must stay alive for the life of the process or
/// buffered log lines are lost.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_thread_ids(false)
        .with_ansi(true)
        .with_writer(std::io::stdout);

    if config.file_logging_enabled {
        let file_appender = rolling::daily(&config.log_dir, "pensieve.log");
        let (writer, guard) = non_blocking(file_appender);

        let file_layer = fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_thread_ids(true)
            .with_ansi(false)
            .json()
            .with_writer(writer);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        tracing::info!("Logging initialized - level: {}", config.level);
        Ok(Some(guard))
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();

        tracing::info!("Logging initialized - level: {}", config.level);
        Ok(None)
    }
}
