//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins over the configured filter. When a log file is configured,
//! a second, non-blocking fmt layer writes to it; keep the returned guard
//! alive for as long as logs should be flushed.

use crate::config::LoggingConfig;
use crate::error::{Result, StepGraphError};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => configured_filter(&config.filter)?,
    };

    let (file_layer, guard) = match &config.file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let name = path.file_name().ok_or_else(|| {
                StepGraphError::Config(format!("log file {:?} has no file name", path))
            })?;
            std::fs::create_dir_all(dir)?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .try_init()
        .map_err(|e| StepGraphError::Config(format!("logging already initialised: {}", e)))?;

    Ok(guard)
}

fn configured_filter(directives: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directives)
        .map_err(|e| StepGraphError::Config(format!("invalid log filter '{}': {}", directives, e)))
}
