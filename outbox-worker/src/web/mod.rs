//! HTTP API over the outbox.
//!
//! - `GET /health` is always open
//! - everything under `/outbox` requires `X-Outbox-Auth` when a token is configured
//! - submissions return as soon as the message is durable

pub mod handlers;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use handlers::{
    count_pending, flush, health, list_pending, lookup, remove, require_auth, submit, AppState,
    CountResponse, ErrorResponse, FlushResponse, HealthResponse, LookupRequest, SubmitParams,
    SubmitResponse, AUTH_HEADER,
};

/// Build the API router.
pub fn router(state: AppState) -> Router {
    let outbox_routes = Router::new()
        .route("/outbox", get(list_pending).post(submit))
        .route("/outbox/count", get(count_pending))
        .route("/outbox/lookup", post(lookup))
        .route("/outbox/flush", post(flush))
        .route("/outbox/:id", delete(remove))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/health", get(health))
        .merge(outbox_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
