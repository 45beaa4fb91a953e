//! Health, liveness, and readiness endpoints. None of them resolve a tenant.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use super::AppState;
use crate::network::HealthState;
use crate::traits::ClientConnector;

/// Detailed health JSON. Always 200; the `state` field carries readiness.
pub async fn health_handler<C: ClientConnector>(
    State(state): State<AppState<C>>,
) -> Json<serde_json::Value> {
    Json(json!({
        "state": state.shutdown.health_state().as_str(),
        "tenants": state.registry.len(),
        "pending": state.registry.pending_len(),
        "in_flight": state.shutdown.in_flight_count(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// Liveness probe: 200 while the process is responsive.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe: 200 only in the `Ready` state, else 503.
pub async fn readiness_handler<C: ClientConnector>(State(state): State<AppState<C>>) -> StatusCode {
    if state.shutdown.health_state() == HealthState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
