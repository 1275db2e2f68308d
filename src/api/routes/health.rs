//! Health check endpoint

use axum::{Json, extract::State};
use chrono::Utc;

use crate::api::{state::ApiState, types::HealthResponse};

/// GET /api/health
///
/// Always answers 200; the body says whether the store is reachable.
pub async fn health_check(State(state): State<ApiState>) -> Json<HealthResponse> {
    let (connected, message) = match state.store.health_check().await {
        Ok(health) => (health.healthy, health.message),
        Err(e) => (false, e.to_string()),
    };

    Json(HealthResponse {
        status: if connected { "ok" } else { "degraded" }.to_string(),
        storage_connected: connected,
        storage_message: message,
        timestamp: Utc::now(),
    })
}
