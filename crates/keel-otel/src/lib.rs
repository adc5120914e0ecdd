use keel_config::LogConfig;
use once_cell::sync::OnceCell;
use tracing_subscriber::{
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// Installs the global subscriber. `RUST_LOG` wins over the configured filter;
/// `KEEL_LOG_DIR` wins over the configured directory.
pub fn init(cfg: &LogConfig) {
    let directive = cfg.filter.clone().unwrap_or_else(|| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directive));
    let dir = std::env::var("KEEL_LOG_DIR")
        .ok()
        .map(std::path::PathBuf::from)
        .or_else(|| cfg.dir.clone());

    let console = fmt::layer().with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(console.with_filter(filter));

    let Some(dir) = dir else {
        let _ = registry.try_init();
        return;
    };
    if std::fs::create_dir_all(&dir).is_err() {
        let _ = registry.try_init();
        tracing::warn!(directory = %dir.display(), "failed to create log directory");
        return;
    }
    let writer = tracing_appender::rolling::daily(&dir, "keel");
    let (nb, guard) = tracing_appender::non_blocking(writer);
    let _ = FILE_GUARD.set(guard);
    let file_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directive));
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(nb)
        .with_filter(file_filter);
    let _ = registry.with(file_layer).try_init();
}
