use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use spoolsync::engine::Engine;
use spoolsync::feed::FeedListener;
use spoolsync::watcher::{self, FolderWatcher};
use spoolsync::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let config = Config::load(Path::new(&config_path))
        .with_context(|| format!("failed to load configuration from {}", config_path))?;

    let engine = Arc::new(Engine::new(config).context("failed to initialize")?);

    // Warm the spool snapshot up front; also doubles as a connectivity
    // check against Spoolman (failure is logged, not fatal).
    engine.refresh_spools().await;

    // Arm the watcher before scanning so no file slips between the two.
    let folder_watcher = FolderWatcher::start(engine.clone())?;
    watcher::initial_scan(&engine)
        .await
        .context("initial folder scan failed")?;

    let listener = tokio::spawn(FeedListener::new(engine.clone()).run());

    tokio::select! {
        _ = engine.shutdown().wait() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
            engine.shutdown().signal();
        }
    }

    info!("shutdown signal received, stopping services");
    folder_watcher.stop();
    listener.abort();
    let _ = listener.await;

    info!("daemon exiting cleanly");
    Ok(())
}
