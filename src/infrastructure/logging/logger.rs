//! Logging bootstrap: file + stdout layers via `tracing-subscriber`, with
//! non-blocking rotated file output via `tracing-appender`, following the
//! teacher's `LoggerImpl::init`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::infrastructure::config::loader::{LogFormat, LoggingConfigSchema};
use crate::infrastructure::logging::secret_scrubbing::SecretScrubbingLayer;

/// Returned so the caller can hold the non-blocking writer guard for the
/// process lifetime; dropping it stops flushing the file appender.
pub struct LoggerGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

pub fn init(config: &LoggingConfigSchema) -> LoggerGuard {
    let env_filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer: Box<dyn tracing_subscriber::Layer<tracing_subscriber::Registry> + Send + Sync> =
        match config.format {
            LogFormat::Json => Box::new(fmt::layer().json()),
            LogFormat::Pretty => Box::new(fmt::layer().pretty()),
        };

    let (file_layer, guard) = match &config.file_directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "conclave.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_writer(non_blocking);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(SecretScrubbingLayer)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    LoggerGuard { _file_guard: guard }
}
