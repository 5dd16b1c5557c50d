//! Stock Liveview API Server
//!
//! Serves the browser client and streams the latest price per company to
//! every connected WebSocket on a fixed interval.

mod config;
mod routes;

use anyhow::Context;
use config::LiveviewConfig;
use liveview_services::{
    Broadcaster, ConnectionHandler, ConnectionRegistry, PriceFeed, SqlitePriceStore,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub connections: ConnectionHandler,
    pub broadcaster: Arc<Broadcaster>,
    /// Directory holding index.html and client assets
    pub static_dir: Arc<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env.local file
    if let Err(e) = dotenvy::from_filename(".env.local") {
        // Not an error if the file doesn't exist
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env.local: {}", e);
        }
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,liveview_api=debug,liveview_services=debug")
        }))
        .init();

    info!("Starting Stock Liveview API");

    let config = LiveviewConfig::from_env().context("Invalid configuration")?;

    // Initialize price storage (SQLite database)
    let db_path = config.database.path();
    info!(
        "Initializing price store at: {} (table {})",
        db_path.display(),
        config.database.table
    );
    let store = SqlitePriceStore::open(&db_path, &config.database.table)
        .with_context(|| format!("Failed to open price store at {}", db_path.display()))?;

    let registry = Arc::new(ConnectionRegistry::new(config.connection_buffer));
    let broadcaster = Arc::new(Broadcaster::new(
        Arc::clone(&registry),
        Arc::new(store.clone()),
        config.broadcast.clone(),
    ));

    let state = AppState {
        connections: ConnectionHandler::new(registry),
        broadcaster: Arc::clone(&broadcaster),
        static_dir: Arc::new(config.static_dir.clone()),
    };
    let app = routes::app(state);

    // Bind before starting background work so a taken port fails fast
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let broadcast_handle = tokio::spawn(broadcaster.run(shutdown_rx.clone()));

    let feed_handle = match config.price_feed.clone() {
        Some(feed_config) => {
            info!(
                "Price feed enabled for {}",
                feed_config.companies.join(", ")
            );
            let feed = PriceFeed::new(store, feed_config);
            Some(tokio::spawn(feed.run(shutdown_rx)))
        }
        None => {
            info!("Price feed disabled (set PRICE_FEED_ENABLED=true to simulate prices)");
            None
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutting down background tasks");
    let _ = shutdown_tx.send(true);

    if let Err(e) = broadcast_handle.await {
        error!("Broadcast loop task failed: {}", e);
    }
    if let Some(handle) = feed_handle {
        if let Err(e) = handle.await {
            error!("Price feed task failed: {}", e);
        }
    }

    info!("Stock Liveview API stopped");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to register ctrl-c handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to register SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => warn!("Received Ctrl+C"),
        _ = terminate => warn!("Received SIGTERM"),
    }
}
