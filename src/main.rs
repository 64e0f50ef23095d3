mod bridge;
mod classify;
mod config;
mod dispatch;
mod gateway;
mod platform;
mod sync;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::dispatch::AppState;
use crate::platform::RestPlatform;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,anvil=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Platform: {}", config.platform.base_url);
    info!("  Extension: {}", config.extension.url);
    info!("  Trigger words: {:?}", config.triggers.words);
    info!("  Commands: {}", config.commands.table.len());

    // Create shared state
    let platform = Arc::new(RestPlatform::new(config.platform.clone()));
    let state = Arc::new(AppState::new(&config, platform)?);

    // Serve the gateway
    let app = gateway::router(state);
    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.server.bind_addr))?;

    info!("Gateway listening on {}", config.server.bind_addr);
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
