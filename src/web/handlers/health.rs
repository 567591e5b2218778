// GET /health: process liveness plus delivery-log reachability.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use tracing::warn;

use crate::web::AppState;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match state.log.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "healthy",
                "queue_size": state.pipeline.queue_size(),
                "keywords": state.pipeline.keywords(),
            })),
        ),
        Err(e) => {
            warn!(error = %e, "Health check: delivery log unreachable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "unhealthy",
                    "error": e.to_string(),
                })),
            )
        }
    }
}
