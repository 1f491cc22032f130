//! Whole-request deadline.

use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::AppError;

/// Middleware answering with the JSON 408 error when the inner service does
/// not finish within `limit`. The unfinished handler future is dropped.
pub async fn enforce_request_timeout(
    State(limit): State<Duration>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    match tokio::time::timeout(limit, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            tracing::warn!(%method, %path, timeout = ?limit, "request timed out");
            AppError::RequestTimeout.into_response()
        }
    }
}
