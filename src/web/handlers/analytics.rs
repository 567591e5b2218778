// GET /analytics: aggregate delivery counts.
//
// success_rate is a percentage of finished deliveries (sent + failed);
// last_24_hours and top_posts count finished records only, never queued
// reservations.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

use crate::web::{api_error, AppState};

pub async fn get_analytics(State(state): State<AppState>) -> Response {
    match state.log.get_stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to load delivery stats");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to load delivery stats")
        }
    }
}
