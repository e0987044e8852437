//! Shared application state.

use std::sync::Arc;
use std::time::Instant;

use ticker_core::config::AppConfig;
use ticker_realtime::RelayEngine;

/// State handed to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Configuration.
    pub config: Arc<AppConfig>,
    /// The relay engine (registry, metrics, subscription state).
    pub engine: Arc<RelayEngine>,
    /// Process start, for uptime reporting.
    pub started_at: Instant,
}

impl AppState {
    /// Creates state around a started engine.
    pub fn new(config: Arc<AppConfig>, engine: Arc<RelayEngine>) -> Self {
        Self {
            config,
            engine,
            started_at: Instant::now(),
        }
    }
}
