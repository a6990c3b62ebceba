//! Liveness probe.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::app_state::AppState;

/// Body of `GET /health`.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Always `ok` when the process answers.
    status: &'static str,
    /// Crate version.
    version: &'static str,
    /// Server clock.
    now: DateTime<Utc>,
    /// Open notification streams on this instance.
    live_streams: usize,
}

/// `GET /health`: Liveness and a few process gauges.
#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    summary = "Health check",
    responses(
        (status = 200, description = "Process is up", body = HealthResponse),
    ),
    security(())
)]
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        now: Utc::now(),
        live_streams: state.notifications.live_streams(),
    })
}

/// Root-level routes, outside `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_handler))
}
