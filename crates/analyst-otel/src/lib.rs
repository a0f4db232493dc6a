use once_cell::sync::OnceCell;
use tracing_subscriber::{
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// Install the global subscriber. Console output always; a rolling log file
/// as well when `ANALYST_LOG_DIR` is set. Safe to call more than once.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = fmt::layer().with_filter(filter);
    let registry = tracing_subscriber::registry().with(console);

    match std::env::var("ANALYST_LOG_DIR") {
        Ok(dir) if !dir.trim().is_empty() => {
            let prefix =
                std::env::var("ANALYST_LOG_PREFIX").unwrap_or_else(|_| "analyst".into());
            let rotation =
                std::env::var("ANALYST_LOG_ROTATION").unwrap_or_else(|_| "daily".into());
            if std::fs::create_dir_all(&dir).is_err() {
                eprintln!("failed to create log directory {dir}");
            }
            let writer = match rotation.to_lowercase().as_str() {
                "hourly" => tracing_appender::rolling::hourly(&dir, &prefix),
                "minutely" => tracing_appender::rolling::minutely(&dir, &prefix),
                _ => tracing_appender::rolling::daily(&dir, &prefix),
            };
            let (nb, guard) = tracing_appender::non_blocking(writer);
            let _ = FILE_GUARD.set(guard);
            let file_filter =
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
            let file_layer = fmt::layer()
                .with_ansi(false)
                .with_writer(nb)
                .with_filter(file_filter);
            let _ = registry.with(file_layer).try_init();
        }
        _ => {
            let _ = registry.try_init();
        }
    }
}
