//! Application error types.

use axum::Json;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Generic body for every 500 response. Provider and internal error text
/// never reaches the client.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Application errors.
#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed input: bad JSON, email, phone, password or missing field.
    #[error("{0}")]
    Validation(String),

    /// Missing or invalid bearer token, or rejected credentials.
    #[error("{0}")]
    Unauthorized(&'static str),

    #[error("Invalid CSRF token")]
    CsrfRejected,

    #[error("Too many requests")]
    RateLimited { retry_after: u64 },

    #[error("Invalid action")]
    UnknownAction,

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Request timeout")]
    RequestTimeout,

    #[error("{0}")]
    ServiceUnavailable(&'static str),

    /// Identity or email provider failure.
    #[error("upstream error")]
    Upstream(#[source] anyhow::Error),

    #[error("internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Shorthand for a validation failure.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Wrap a provider failure, keeping `context` for the log line.
    pub fn upstream<E>(context: &'static str, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Upstream(anyhow::Error::new(err).context(context))
    }

    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::UnknownAction => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::CsrfRejected => StatusCode::FORBIDDEN,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::RequestTimeout => StatusCode::REQUEST_TIMEOUT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Upstream(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let message = match &self {
            AppError::Upstream(e) => {
                tracing::error!(error = ?e, "upstream provider error");
                INTERNAL_ERROR_MESSAGE.to_string()
            }
            AppError::Internal(e) => {
                tracing::error!(error = ?e, "internal server error");
                INTERNAL_ERROR_MESSAGE.to_string()
            }
            _ => self.to_string(),
        };

        let mut response = (status, Json(json!({ "error": message }))).into_response();

        if let AppError::RateLimited { retry_after } = self
            && let Ok(value) = retry_after.to_string().parse()
        {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }

        response
    }
}

/// Result type alias using AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn upstream_error_does_not_leak_detail() {
        let err = AppError::Upstream(anyhow::anyhow!("duplicate key value violates constraint"));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], INTERNAL_ERROR_MESSAGE);
    }

    #[tokio::test]
    async fn rate_limited_sets_retry_after() {
        let response = AppError::RateLimited { retry_after: 300 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "300");
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            AppError::validation("Invalid email format").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::CsrfRejected.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::UnknownAction.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::MethodNotAllowed.status_code(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            AppError::RequestTimeout.status_code(),
            StatusCode::REQUEST_TIMEOUT
        );
    }

    #[tokio::test]
    async fn timeout_has_json_error_body() {
        let body = body_json(AppError::RequestTimeout.into_response()).await;
        assert_eq!(body["error"], "Request timeout");
    }
}
