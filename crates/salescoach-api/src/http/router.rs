//! Axum router configuration with middleware.
//!
//! All routes are under `/api/v1/`.
//! Middleware: CORS, tracing.

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Training runs
        .route("/runs/start", post(handlers::run::start_run))
        .route("/runs/turn", post(handlers::run::handle_turn))
        .route("/runs/feedback", post(handlers::run::request_feedback))
        .route("/runs/finalize", post(handlers::run::finalize_run))
        // Users
        .route(
            "/users/{external_id}/profile",
            get(handlers::profile::get_profile),
        )
        .route(
            "/users/{external_id}/access",
            get(handlers::access::check_access),
        )
        .route(
            "/users/{external_id}/access/grants",
            post(handlers::access::grant_access).get(handlers::access::list_grants),
        )
        // Promo codes
        .route("/promo/codes", post(handlers::promo::create_promo))
        .route("/promo/redeem", post(handlers::promo::redeem_promo))
        // Provider status
        .route("/providers/status", get(handlers::status::provider_status));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /healthz - Simple health check endpoint.
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
