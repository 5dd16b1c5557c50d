//! Health check endpoints

use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use liveview_services::BroadcastHealth;
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    /// Why the last tick failed, present only while degraded
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    /// Live WebSocket clients
    connections: usize,
    broadcaster: BroadcastHealth,
}

impl HealthResponse {
    fn from_broadcaster(broadcaster: BroadcastHealth) -> (StatusCode, Self) {
        let (status, code, reason) = if broadcaster.healthy {
            ("healthy", StatusCode::OK, None)
        } else {
            let reason = broadcaster
                .last_error
                .clone()
                .unwrap_or_else(|| "last broadcast tick failed".to_string());
            ("degraded", StatusCode::SERVICE_UNAVAILABLE, Some(reason))
        };

        let response = Self {
            status,
            reason,
            connections: broadcaster.connections,
            broadcaster,
        };
        (code, response)
    }
}

/// Broadcaster health: 200 while ticks succeed, 503 after a failed fetch
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (code, response) = HealthResponse::from_broadcaster(state.broadcaster.health());
    (code, Json(response))
}

async fn liveness() -> &'static str {
    "OK"
}

/// Create health routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/live", get(liveness))
}
