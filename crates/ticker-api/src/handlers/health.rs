//! Health check handler.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use ticker_realtime::SubscriptionState;
use ticker_realtime::metrics::MetricsSnapshot;

use crate::state::AppState;

/// Health response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `ok` while the subscription is live, `degraded` otherwise.
    pub status: String,
    /// Relay build version.
    pub version: String,
    /// Seconds since the server started.
    pub uptime_seconds: u64,
    /// Relayed channel.
    pub channel: String,
    /// Connected clients.
    pub clients: usize,
    /// Upstream subscription state.
    pub subscription: SubscriptionState,
    /// Relay counters.
    pub metrics: MetricsSnapshot,
}

/// GET /api/health
///
/// Answers 503 while updates are not flowing so load balancers can react.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let subscription = state.engine.subscription_state();
    let (code, status) = match subscription {
        SubscriptionState::Live => (StatusCode::OK, "ok"),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "degraded"),
    };

    let body = HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        channel: state.engine.channel().to_string(),
        clients: state.engine.registry.len(),
        subscription,
        metrics: state.engine.metrics.snapshot(),
    };

    (code, Json(body))
}
