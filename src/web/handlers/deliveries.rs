// GET /deliveries: recent delivery records, newest first.
//
// Optional ?limit= parameter (default 50, max 500).

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::error;

use crate::web::{api_error, AppState};

pub const DEFAULT_LIMIT: u32 = 50;
pub const MAX_LIMIT: u32 = 500;

#[derive(Deserialize, Default)]
pub struct DeliveriesQuery {
    pub limit: Option<u32>,
}

pub async fn list_deliveries(
    State(state): State<AppState>,
    Query(params): Query<DeliveriesQuery>,
) -> Response {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    match state.log.get_recent_deliveries(limit).await {
        Ok(deliveries) => Json(serde_json::json!({ "deliveries": deliveries })).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to load recent deliveries");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to load deliveries")
        }
    }
}
