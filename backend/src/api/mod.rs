//! API handlers.

use axum::{extract::State, Json};
use chromedash_types::HealthResponse;

use crate::state::AppState;

pub mod gateway;

/// Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    responses(
        (status = 200, description = "Server is up", body = HealthResponse)
    )
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        sessions: state.gateway().registry().len(),
    })
}
