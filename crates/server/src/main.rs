//! Reward callback verification server.
//!
//! Loads the provider's keys in the background, serves callbacks until
//! Ctrl-C, then stops the refresher and drops every key.

use std::sync::Arc;

use reward_ssv::{KeyRefresher, KeyStore, RefresherConfig};
use reward_ssv_server::{AppState, listen_addr_from_env, router};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let addr = listen_addr_from_env()?;
    let config = RefresherConfig::default();
    let store = Arc::new(KeyStore::new());
    let refresher = Arc::new(KeyRefresher::new(Arc::clone(&store), &config)?).start();

    tracing::info!(
        %addr,
        key_url = config.key_url(),
        refresh_interval = ?config.refresh_interval(),
        "reward callback listener starting"
    );

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, router(AppState::new(Arc::clone(&store))))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    refresher.shutdown().await;
    store.clear();
    tracing::info!("reward callback listener stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
