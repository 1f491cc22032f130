//! CORS and hardening headers applied to every response.
//!
//! Only a single origin is allowed and it is echoed back verbatim, so
//! credentials can be sent cross-origin from the dashboard.

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, header};
use axum::middleware::Next;
use axum::response::Response;

use crate::state::AppState;

/// Request headers the dashboard may send.
pub const ALLOWED_HEADERS: &str = "Content-Type, Authorization, X-CSRF-Token";

/// Methods advertised to browsers.
pub const ALLOWED_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";

/// Policy for JSON-only API endpoints: nothing may be loaded or framed.
pub const API_CONTENT_SECURITY_POLICY: &str =
    "default-src 'none'; frame-ancestors 'none'; base-uri 'none'; form-action 'none'";

const STATIC_HEADERS: [(HeaderName, &str); 8] = [
    (header::ACCESS_CONTROL_ALLOW_HEADERS, ALLOWED_HEADERS),
    (header::ACCESS_CONTROL_ALLOW_METHODS, ALLOWED_METHODS),
    (header::ACCESS_CONTROL_ALLOW_CREDENTIALS, "true"),
    (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
    (header::X_FRAME_OPTIONS, "DENY"),
    (header::X_XSS_PROTECTION, "1; mode=block"),
    (
        header::STRICT_TRANSPORT_SECURITY,
        "max-age=31536000; includeSubDomains",
    ),
    (header::REFERRER_POLICY, "strict-origin-when-cross-origin"),
];

/// Insert the CORS and hardening header set into `headers`.
///
/// `Content-Type` defaults to JSON but is left alone when the handler set
/// one (e.g. the metrics endpoint).
pub fn apply_security_headers(headers: &mut HeaderMap, allowed_origin: &str) {
    match HeaderValue::from_str(allowed_origin) {
        Ok(origin) => {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        }
        Err(e) => {
            tracing::warn!(origin = %allowed_origin, error = %e, "unusable CORS origin");
        }
    }

    for (name, value) in STATIC_HEADERS {
        headers.insert(name, HeaderValue::from_static(value));
    }

    headers
        .entry(header::CONTENT_TYPE)
        .or_insert(HeaderValue::from_static("application/json"));
}

/// Middleware adding the security header set to every response.
pub async fn security_headers(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    apply_security_headers(response.headers_mut(), &state.config().allowed_origin);
    response
}

/// Middleware adding the restrictive content security policy. Layered only
/// on the auth endpoint.
pub async fn api_content_security_policy(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(API_CONTENT_SECURITY_POLICY),
    );
    response
}
