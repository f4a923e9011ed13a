//! Request middleware: shared-token authentication and request logging.

use crate::AppState;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use shellbox_runtime::Runtime;
use std::time::Instant;
use tracing::{debug, info, warn};

pub const API_KEY_HEADER: &str = "x-api-key";

/// Reject requests whose `X-API-Key` does not match the configured token.
/// With no token configured, every request passes. This is a transport
/// concern, so the rejection is a plain 401, not a taxonomy envelope.
pub async fn require_api_key<R: Runtime>(
    State(state): State<AppState<R>>,
    req: Request,
    next: Next,
) -> Response {
    if let Some(expected) = state.api_key.as_deref().filter(|key| !key.is_empty()) {
        let provided = req
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok());
        if provided != Some(expected) {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"detail": "invalid or missing X-API-Key"})),
            )
                .into_response();
        }
    }
    next.run(req).await
}

pub async fn log_requests(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!("Request: {} {}", method, path);

    let response = next.run(req).await;
    let duration = start.elapsed();
    let status = response.status();

    if status.is_client_error() || status.is_server_error() {
        warn!(
            "Request failed: {} {} - {} ({:?})",
            method, path, status, duration
        );
    } else {
        info!(
            "Request completed: {} {} - {} ({:?})",
            method, path, status, duration
        );
    }

    response
}
