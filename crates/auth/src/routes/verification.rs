//! Verification code email endpoint.
//!
//! Sends a 6-digit code, generated and checked by the caller, through the
//! configured email provider.

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::routes::{check_general_limit, parse_json_object};
use crate::security::{sanitize_object, validate_email};
use crate::state::AppState;

/// Number of digits in a verification code.
pub const CODE_LENGTH: usize = 6;

/// Create the verification email router.
pub fn router() -> Router<AppState> {
    Router::new().route("/api/send-verification", any(handle))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerificationRequest {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
}

/// Whether `code` is exactly [`CODE_LENGTH`] ASCII digits.
pub fn is_valid_code(code: &str) -> bool {
    code.len() == CODE_LENGTH && code.bytes().all(|b| b.is_ascii_digit())
}

async fn handle(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    if method == Method::OPTIONS {
        return Ok(StatusCode::OK.into_response());
    }

    check_general_limit(&state, &headers).await?;

    if method != Method::POST {
        return Err(AppError::MethodNotAllowed);
    }

    let body = sanitize_object(parse_json_object(&body)?);
    let request: VerificationRequest = serde_json::from_value(Value::Object(body))
        .map_err(|_| AppError::validation("Invalid request body"))?;

    let (Some(email), Some(code)) = (request.email, request.code) else {
        return Err(AppError::validation("Email and code are required"));
    };
    if !validate_email(&email) {
        return Err(AppError::validation("Invalid email format"));
    }
    if !is_valid_code(&code) {
        return Err(AppError::validation("Verification code must be 6 digits"));
    }

    let email_service = state
        .email()
        .ok_or(AppError::ServiceUnavailable("Email service not configured"))?;

    match email_service
        .send_verification_code(
            &email,
            &code,
            request.first_name.as_deref(),
            request.last_name.as_deref(),
        )
        .await
    {
        Ok(message_id) => {
            info!(message_id = %message_id, "verification email sent");
            state.metrics().record_email(true);
            Ok(Json(json!({ "success": true, "messageId": message_id })).into_response())
        }
        Err(e) => {
            state.metrics().record_email(false);
            Err(AppError::Upstream(e.context("failed to send verification email")))
        }
    }
}
