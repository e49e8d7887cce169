//! imgpull daemon: starts the pull worker and serves the settings page.
//!
//! Logging goes to stderr and to `imgpull.log`; the log file is what the
//! settings page shows as its rolling tail.

use imgpull::config::SettingsStore;
use imgpull::scheduler::PullScheduler;
use imgpull::store::ArtifactStore;
use imgpull::web::{self, AppState};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let data_dir = std::env::var_os("IMGPULL_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let log_path = data_dir.join("imgpull.log");

    let file_appender = tracing_appender::rolling::never(&data_dir, "imgpull.log");
    let (file_writer, _log_guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    tracing::info!("imgpull starting");

    let settings = SettingsStore::open(data_dir.join("settings.json"));
    let artifacts = ArtifactStore::open(data_dir.join("pull"))?;
    let client = imgpull::pipeline::http_client()?;

    let state = Arc::new(AppState {
        settings,
        artifacts,
        client,
        scheduler: Mutex::new(PullScheduler::new()),
        log_path,
    });

    web::start_job(&state).await;

    let addr = std::env::var("IMGPULL_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_owned());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("settings page on http://{}", listener.local_addr()?);

    let app = web::router(Arc::clone(&state));
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("cannot listen for shutdown signal: {e}");
            }
        })
        .await?;

    tracing::info!("shutting down, stopping pull worker");
    web::stop_job(&state).await;
    tracing::info!("imgpull shut down cleanly");
    Ok(())
}
