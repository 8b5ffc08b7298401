mod api;

use std::sync::Arc;

use anyhow::{Context, Result};
use nocard_config::NoCardConfig;
use nocard_core::{JsonFileStore, MemoryStore, SecurityMonitor, SecurityStore, SystemClock};
use tracing::{info, warn};

use crate::api::{router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    if let Err(err) = dotenvy::dotenv() {
        if !err.not_found() {
            warn!(error = %err, "failed to read .env file");
        }
    }

    let config = NoCardConfig::load().context("failed to load configuration")?;
    let store: Arc<dyn SecurityStore> = match &config.storage.dir {
        Some(dir) => {
            info!(dir = %dir.display(), "persisting security state to disk");
            Arc::new(
                JsonFileStore::open(dir)
                    .with_context(|| format!("failed to open store at {}", dir.display()))?,
            )
        }
        None => {
            warn!("no storage dir configured, security state is kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let monitor = SecurityMonitor::open(config.monitor_options(), store, Arc::new(SystemClock));
    let app = router(AppState {
        monitor,
        limits: config.server.clone(),
    });

    let addr = config.server.bind;
    info!(%addr, "starting nocard server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server failed unexpectedly")?;

    info!("nocard server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
    }
}
