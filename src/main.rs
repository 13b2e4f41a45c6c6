use quorum::config::AppConfig;
use quorum::engine::Supervisor;
use quorum::error::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_logging() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,quorum=debug"));

    let log_dir = std::env::var("QUORUM_LOG_DIR").ok();

    // File layer only when the directory is actually writable; the daily
    // appender aborts otherwise.
    let file_layer = log_dir.and_then(|dir| {
        std::fs::create_dir_all(&dir).ok()?;
        let probe = std::path::Path::new(&dir).join(".quorum_write_test");
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&probe)
            .ok()?;
        let _ = std::fs::remove_file(&probe);

        let appender = tracing_appender::rolling::daily(&dir, "quorum.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        Box::leak(Box::new(guard));

        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true),
        )
    });

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let config = AppConfig::load()?;
    info!(
        symbols = ?config.symbols,
        dry_run = config.dry_run,
        model = %config.model.name,
        "quorum starting"
    );

    let supervisor = Supervisor::new(config)?;
    supervisor.run().await
}
