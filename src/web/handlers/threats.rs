// GET /api/threats       the 20 most recent stored analyses
// GET /api/threat-stats  counts by threat level and by primary harm type

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::warn;

use crate::web::{api_error, AppState};

const RECENT_LIMIT: u32 = 20;

/// GET /api/threats
pub async fn list_threats(State(state): State<AppState>) -> Response {
    match state.db.get_recent_analyses(RECENT_LIMIT).await {
        Ok(records) => Json(records).into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to load recent analyses");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load threats")
        }
    }
}

/// GET /api/threat-stats
pub async fn threat_stats(State(state): State<AppState>) -> Response {
    match state.db.get_threat_stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to compute threat stats");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load threat stats")
        }
    }
}
