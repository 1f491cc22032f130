//! HTTP route handlers.

pub mod auth;
pub mod csrf;
pub mod health;
pub mod metrics;
pub mod verification;

use std::any::Any;

use axum::Router;
use axum::http::{HeaderMap, header};
use axum::response::{IntoResponse, Response};
use serde_json::{Map, Value};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use crate::error::{AppError, AppResult};
use crate::middleware::get_client_id;
use crate::state::AppState;

/// Build the application router with every layer applied.
pub fn app_router(state: AppState) -> Router {
    let request_timeout = state.config().request_timeout;

    Router::new()
        .merge(auth::router())
        .merge(verification::router())
        .merge(csrf::router())
        .merge(health::router())
        .merge(metrics::router())
        // Middleware layers (last added = first executed in request flow):
        // TraceLayer → security headers → catch panic → metrics → timeout → routes
        .layer(axum::middleware::from_fn_with_state(
            request_timeout,
            crate::middleware::enforce_request_timeout,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::metrics::track_requests,
        ))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::security_headers,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    AppError::Internal(anyhow::anyhow!("handler panicked: {detail}")).into_response()
}

/// Consume one general-limiter point for the caller and return its client id.
pub(crate) async fn check_general_limit(state: &AppState, headers: &HeaderMap) -> AppResult<String> {
    let client = get_client_id(headers);
    if let Err(retry_after) = state.general_limiter().check(&client).await {
        tracing::warn!(client = %client, "general rate limit exceeded");
        state.metrics().record_rate_limit(state.general_limiter().name());
        return Err(AppError::RateLimited { retry_after });
    }
    Ok(client)
}

/// Token from an `Authorization: Bearer <token>` header.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Parse a request body as a JSON object.
pub(crate) fn parse_json_object(body: &[u8]) -> AppResult<Map<String, Value>> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::debug!(error = %e, "rejected request body");
        AppError::validation("Invalid request body")
    })
}
