// Process-wide tracing subscriber setup
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, time::ChronoUtc},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::{LogFormat, LoggerConfig, LoggingError};

/// Keeps the background file writer alive; drop it only at shutdown
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Install the global subscriber described by `config`.
///
/// `RUST_LOG` wins over `config.level` when set.
pub fn init_logging(config: &LoggerConfig) -> Result<LoggingGuard, LoggingError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|_| LoggingError::InvalidFilter(config.level.clone()))?,
    };

    let stdout_layer = match config.format {
        LogFormat::Json => fmt::layer()
            .with_target(false)
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(false)
            .json()
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .boxed(),
    };

    let (file_layer, file_guard) = match &config.file {
        Some(file) => {
            let appender = tracing_appender::rolling::daily(&file.directory, &file.prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_timer(ChronoUtc::rfc_3339())
                .json()
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialised(e.to_string()))?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}
