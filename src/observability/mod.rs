//! Structured logging setup, following `acton_htmx::observability::init`.

use crate::config::AppConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global `tracing` subscriber from configuration.
///
/// Pretty-formats in debug builds, emits JSON lines in release builds,
/// mirroring the teacher's `cfg(debug_assertions)` split. When
/// `log_file` is set, logs are additionally written there through a
/// non-blocking appender; the returned guard must be kept alive for the
/// lifetime of the process or buffered lines will be dropped on exit.
///
/// # Errors
///
/// Returns an error if a global subscriber has already been installed.
pub fn init(config: &AppConfig) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let env_filter = EnvFilter::try_new(&config.log_level)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    let (file_layer, guard) = match &config.log_file {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .map_or_else(|| "cronmill.log".to_string(), |n| n.to_string_lossy().to_string());
            let file_appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            (Some(fmt::layer().with_writer(non_blocking).json()), Some(guard))
        }
        None => (None, None),
    };

    if cfg!(debug_assertions) {
        registry
            .with(fmt::layer().pretty())
            .with(file_layer)
            .try_init()?;
    } else {
        registry
            .with(fmt::layer().json())
            .with(file_layer)
            .try_init()?;
    }

    Ok(guard)
}
