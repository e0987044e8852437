//! Ticker Relay: real-time market-data fan-out server.
//!
//! Subscribes once to the upstream update channel and pushes every message
//! to all connected WebSocket clients.

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt};

use ticker_core::config::AppConfig;
use ticker_core::error::AppError;
use ticker_realtime::RelayEngine;
use ticker_realtime::bridge::backend_from_config;

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!("Relay error: {}", e);
        std::process::exit(1);
    }
}

/// Load configuration from `config/` and the environment
fn load_configuration() -> Result<AppConfig, AppError> {
    let env = std::env::var("TICKER_ENV").unwrap_or_else(|_| "development".to_string());
    AppConfig::load(&env)
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Main server run function
async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting Ticker Relay v{}", env!("CARGO_PKG_VERSION"));

    // ── Step 1: Upstream subscription (fatal on failure) ─────────
    tracing::info!(
        "Subscribing to channel '{}' ({:?} backend)...",
        config.pubsub.channel,
        config.pubsub.backend
    );
    let backend = backend_from_config(&config.pubsub)?;
    let engine = Arc::new(RelayEngine::start(&config, backend).await?);

    // ── Step 2: Bind listener ────────────────────────────────────
    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::internal(format!("Failed to bind {}: {}", addr, e)))?;

    let local = listener.local_addr()?;
    tracing::info!("======================================================");
    tracing::info!("  Ticker relay running on {}", local);
    tracing::info!("  WebSocket URL: ws://localhost:{}", local.port());
    tracing::info!("  Relaying channel: {}", config.pubsub.channel);
    tracing::info!("======================================================");

    // ── Step 3: Serve with graceful shutdown ─────────────────────
    let grace = Duration::from_secs(config.server.shutdown_grace_seconds);
    let config = Arc::new(config);
    let state = ticker_api::AppState::new(Arc::clone(&config), Arc::clone(&engine));
    let app = ticker_api::build_router(state);

    let shutdown_engine = Arc::clone(&engine);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received, starting graceful shutdown...");
            // Close client sockets before the HTTP drain.
            shutdown_engine.shutdown(grace).await;
        })
        .await
        .map_err(|e| AppError::internal(format!("Server error: {}", e)))?;

    // ── Step 4: Release anything still open ──────────────────────
    engine.shutdown(grace).await;

    tracing::info!("Ticker relay shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
