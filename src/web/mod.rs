// Web server: Axum-based webhook receiver and read-only admin endpoints.
//
// GET  /webhook     subscription verification handshake
// POST /webhook     comment event delivery (always acknowledged)
// GET  /health      liveness plus delivery-log reachability
// GET  /analytics   aggregate delivery counts
// GET  /deliveries  recent delivery records
//
// Handlers never block on delivery: the pipeline only enqueues.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::db::DeliveryLog;
use crate::pipeline::Pipeline;

pub mod handlers;

/// Largest webhook body read and parsed. Bigger bodies are still
/// acknowledged, just not processed.
pub const WEBHOOK_BODY_LIMIT: usize = 16 * 1024 * 1024;

/// Shared application state threaded through all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Pipeline,
    pub log: Arc<dyn DeliveryLog>,
    pub config: Arc<Config>,
}

/// Serve until `shutdown` is cancelled, then finish in-flight requests.
pub async fn run_server(state: AppState, shutdown: CancellationToken) -> Result<()> {
    let addr = format!("{}:{}", state.config.bind, state.config.port);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("autodm webhook server listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("Webhook server stopped");
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/webhook",
            get(handlers::webhook::verify)
                .post(handlers::webhook::receive)
                .layer(DefaultBodyLimit::max(WEBHOOK_BODY_LIMIT)),
        )
        .route("/health", get(handlers::health::health))
        .route("/analytics", get(handlers::analytics::get_analytics))
        .route("/deliveries", get(handlers::deliveries::list_deliveries))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Typed JSON error response helper.
pub fn api_error(status: StatusCode, message: &str) -> Response {
    (status, axum::Json(serde_json::json!({ "error": message }))).into_response()
}
