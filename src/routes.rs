//! Route definitions and router setup
//!
//! Configures all API routes and middleware.

mod approvals;
mod audit;
mod replay;
mod tools;

use crate::config::Settings;
use crate::state::SharedState;
use axum::{
    extract::State,
    http::{header, Method},
    routing::{get, post},
    Json, Router,
};
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    request_id::MakeRequestUuid,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
    ServiceBuilderExt,
};
use tracing::Level;

/// Create the application router with all routes and middleware
pub fn create_router(state: SharedState, settings: &Settings) -> Router {
    // Build CORS layer
    let cors = build_cors_layer(settings);

    // Build tracing/logging layer
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    // Build middleware stack
    let middleware = ServiceBuilder::new()
        .set_x_request_id(MakeRequestUuid)
        .layer(trace_layer)
        .layer(CompressionLayer::new())
        .layer(cors)
        .propagate_x_request_id();

    // Build the router
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Governed tools
        .route("/api/run_query", post(tools::run_query))
        .route("/api/search_documents", post(tools::search_documents))
        .route("/api/explain_metric", post(tools::explain_metric))
        .route("/api/generate_chart", post(tools::generate_chart))
        // Replay
        .route("/api/replay/{request_id}", get(replay::get_replay))
        // Approvals
        .route("/api/approvals", get(approvals::list_approvals))
        .route("/api/approvals/callback", post(approvals::approval_callback))
        .route("/api/approvals/{request_id}", get(approvals::get_approval))
        // Audit listing (dashboard boundary)
        .route("/api/audit", get(audit::list_audit_logs))
        // Apply middleware and state
        .layer(middleware)
        .with_state(state)
}

/// Build CORS layer from settings
fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<_> = settings
        .cors
        .allowed_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    if origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
    } else {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
    }
}

/// Health check endpoint
async fn health_check(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let pool_status = state.db_pool.status();
    Json(serde_json::json!({
        "status": "healthy",
        "service": "querygate-api",
        "pool": {
            "size": pool_status.size,
            "available": pool_status.available,
        },
    }))
}
