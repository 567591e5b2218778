// GET/POST /webhook: subscription handshake and event intake.
//
// POST always answers 200 "EVENT_RECEIVED", even for bodies that fail to
// parse or exceed the body limit: a non-2xx makes the platform redeliver
// the same payload.

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::pipeline::Admission;
use crate::web::AppState;
use crate::webhook::parser::parse_comment_events;
use crate::webhook::verify::{verify_subscription, VerifyOutcome, VerifyParams};

/// Body of every POST acknowledgement.
pub const EVENT_RECEIVED: &str = "EVENT_RECEIVED";

pub async fn verify(
    State(state): State<AppState>,
    Query(params): Query<VerifyParams>,
) -> Response {
    match verify_subscription(&params, &state.config.pipeline.verify_token) {
        VerifyOutcome::Accepted(challenge) => {
            info!("Webhook subscription verified");
            (StatusCode::OK, challenge).into_response()
        }
        VerifyOutcome::Mismatch => {
            warn!(mode = ?params.mode, "Webhook verification rejected");
            StatusCode::FORBIDDEN.into_response()
        }
    }
}

pub async fn receive(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> impl IntoResponse {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            warn!(error = %rejection, "Unreadable webhook body, acknowledging anyway");
            return (StatusCode::OK, EVENT_RECEIVED);
        }
    };

    let events = match parse_comment_events(&body, Utc::now()) {
        Ok(events) => events,
        Err(e) => {
            warn!(error = %e, bytes = body.len(), "Unparsable webhook body, acknowledging anyway");
            return (StatusCode::OK, EVENT_RECEIVED);
        }
    };

    let mut queued = 0usize;
    for event in &events {
        if state.pipeline.handle_comment(event).await == Admission::Queued {
            queued += 1;
        }
    }
    debug!(events = events.len(), queued, "Webhook processed");

    (StatusCode::OK, EVENT_RECEIVED)
}
