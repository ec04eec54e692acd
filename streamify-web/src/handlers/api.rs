//! JSON API handlers for handle statistics and health checks

use axum::Json;
use axum::extract::State;
use chrono::{DateTime, Utc};
use serde::Serialize;
use streamify_core::handles::ManagerStats;

use crate::error::ApiError;
use crate::server::AppState;

/// `GET /api/handles/stats`
///
/// # Errors
/// - `ApiError::Handles` - Handle manager has shut down
pub async fn api_handle_stats(State(state): State<AppState>) -> Result<Json<ManagerStats>, ApiError> {
    let stats = state.handles().stats().await?;
    Ok(Json(stats))
}

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `ok` while the handle manager runs, `degraded` otherwise
    pub status: &'static str,
    /// Runtime mode the server was started in
    pub mode: String,
    /// Server start time
    pub started_at: DateTime<Utc>,
    /// Seconds since start
    pub uptime_secs: i64,
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = if state.handles().is_running() {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        mode: state.mode.to_string(),
        started_at: state.started_at,
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    })
}
