//! CSRF token issuing endpoint.

use axum::extract::State;
use axum::http::{HeaderMap, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::routes::check_general_limit;
use crate::security::csrf::{csrf_cookie, generate_csrf_token};
use crate::state::AppState;

/// Create the CSRF token router.
pub fn router() -> Router<AppState> {
    Router::new().route("/api/csrf-token", get(issue_token))
}

/// Issue a fresh token in the body and in the `csrf_token` cookie. The
/// client sends it back in the `X-CSRF-Token` header.
async fn issue_token(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Response> {
    check_general_limit(&state, &headers).await?;

    let token = generate_csrf_token();
    let cookie = csrf_cookie(&token)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("CSRF cookie is not a valid header")))?;

    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(json!({ "csrfToken": token })),
    )
        .into_response())
}
