//! Outbox API handlers.
//!
//! Store access is blocking, so every handler hops onto the blocking pool
//! through [`blocking`]. Delivery attempts started here run in the
//! background; responses never wait on a transport.

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::OutboxError;
use crate::outbox::Outbox;
use crate::query::RecordView;
use crate::Config;

/// Header carrying the shared API token.
pub const AUTH_HEADER: &str = "X-Outbox-Auth";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub outbox: Outbox,
}

impl AppState {
    pub fn new(config: Config, outbox: Outbox) -> Self {
        Self {
            config: Arc::new(config),
            outbox,
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Error body returned by every endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub error: String,
}

/// Handler failure rendered as a JSON error.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    label: &'static str,
    message: String,
}

impl ApiError {
    fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            label: "unauthorized",
            message: "missing or invalid auth token".to_string(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            label: "bad_request",
            message: message.into(),
        }
    }
}

impl From<OutboxError> for ApiError {
    fn from(e: OutboxError) -> Self {
        let status = match e {
            OutboxError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error!(error = %e, "api_request_failed");
        Self {
            status,
            label: "error",
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                status: self.label.to_string(),
                error: self.message,
            }),
        )
            .into_response()
    }
}

/// Run blocking store work off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, OutboxError> + Send + 'static,
    T: Send + 'static,
{
    let result = tokio::task::spawn_blocking(f)
        .await
        .map_err(OutboxError::from)?;
    Ok(result?)
}

// =============================================================================
// Auth
// =============================================================================

/// Reject requests without the configured `X-Outbox-Auth` token.
///
/// With no token configured every request is let through.
pub async fn require_auth(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request<Body>,
    next: Next,
) -> Response {
    let provided = headers.get(AUTH_HEADER).and_then(|v| v.to_str().ok());
    let expected = state.config.api_auth_token.as_deref();

    match (provided, expected) {
        (Some(provided), Some(expected)) if provided == expected => {}
        (None, Some(_)) => {
            warn!(path = %request.uri().path(), "api_auth_missing");
            return ApiError::unauthorized().into_response();
        }
        (Some(_), Some(_)) => {
            warn!(path = %request.uri().path(), "api_auth_invalid");
            return ApiError::unauthorized().into_response();
        }
        (_, None) => {}
    }

    next.run(request).await
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

// =============================================================================
// Queries
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: usize,
}

#[derive(Debug, Deserialize)]
pub struct LookupRequest {
    pub ids: Vec<String>,
}

/// `GET /outbox`: every queued message, oldest first.
pub async fn list_pending(State(state): State<AppState>) -> Result<Json<Vec<RecordView>>, ApiError> {
    let outbox = state.outbox.clone();
    let views = blocking(move || outbox.list_pending()).await?;
    Ok(Json(views))
}

/// `GET /outbox/count`
pub async fn count_pending(State(state): State<AppState>) -> Result<Json<CountResponse>, ApiError> {
    let outbox = state.outbox.clone();
    let count = blocking(move || outbox.count_pending()).await?;
    Ok(Json(CountResponse { count }))
}

/// `POST /outbox/lookup`: views for the given ids, unknown ids skipped.
pub async fn lookup(
    State(state): State<AppState>,
    Json(request): Json<LookupRequest>,
) -> Result<Json<Vec<RecordView>>, ApiError> {
    let ids: HashSet<String> = request.ids.into_iter().collect();
    let outbox = state.outbox.clone();
    let views = blocking(move || outbox.lookup(&ids)).await?;
    Ok(Json(views))
}

// =============================================================================
// Submission and Flush
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct SubmitParams {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub status: String,
    pub id: String,
    pub newly_queued: bool,
    pub attempted: bool,
}

/// `POST /outbox`: queue a raw RFC 5322 message and attempt delivery.
pub async fn submit(
    State(state): State<AppState>,
    Query(params): Query<SubmitParams>,
    body: Bytes,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    // Message bytes are taken as-is; 8-bit mail need not be UTF-8
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ApiError::bad_request("message body is empty"));
    }

    info!(
        content_length = body.len(),
        force = params.force,
        "api_submit_received"
    );

    let outbox = state.outbox.clone();
    let receipt = blocking(move || outbox.send(body, params.force)).await?;

    let status = if receipt.newly_queued {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };

    Ok((
        status,
        Json(SubmitResponse {
            status: if receipt.newly_queued { "queued" } else { "already_queued" }.to_string(),
            id: receipt.record.id,
            newly_queued: receipt.newly_queued,
            attempted: receipt.attempt.is_some(),
        }),
    ))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FlushResponse {
    pub scheduled: usize,
    pub ids: Vec<String>,
}

/// `POST /outbox/flush`: retry every queued message in the background.
pub async fn flush(State(state): State<AppState>) -> Result<(StatusCode, Json<FlushResponse>), ApiError> {
    let outbox = state.outbox.clone();
    let handle = blocking(move || outbox.flush()).await?;

    let response = FlushResponse {
        scheduled: handle.scheduled(),
        ids: handle.ids(),
    };

    // Completion is logged by the handle; the caller does not wait for it.
    tokio::spawn(handle.wait());

    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// `DELETE /outbox/:id`: drop a queued message without sending it.
pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let outbox = state.outbox.clone();
    let removed = blocking(move || outbox.remove(&id)).await?;

    Ok(if removed {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    })
}
