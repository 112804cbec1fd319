pub mod auth;
pub mod error_response;
pub mod internal;
pub mod principal;
pub mod stream;
pub mod supervisor;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
///
/// Routes are split into **public** (no auth required) and **protected**
/// (gated behind the bearer-token middleware, §10.5).
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/v1/health", get(health));

    let protected = Router::new()
        .route("/supervisor", post(supervisor::dispatch))
        .route("/supervisor/events", get(supervisor::legacy_events))
        .route("/supervisor/:run_id/cancel", post(supervisor::cancel))
        .route("/stream/runs/:run_id", get(stream::run_events))
        .route(
            "/jarvis/internal/runs/:run_id/resume",
            post(internal::resume),
        )
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_api_token,
        ));

    public
        .merge(protected)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "ok"
}
