//! CSRF token generation and double-submit verification.
//!
//! The client echoes the `csrf_token` cookie in the `X-CSRF-Token` header;
//! a request passes only when both are present and equal.

use axum::http::{HeaderMap, HeaderValue, header};
use rand::RngCore;
use subtle::ConstantTimeEq;

/// Cookie carrying the token.
pub const CSRF_COOKIE: &str = "csrf_token";

/// Header carrying the token.
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Generate a CSRF token: 32 random bytes, hex encoded (64 chars).
pub fn generate_csrf_token() -> String {
    let mut random_bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut random_bytes);
    hex::encode(random_bytes)
}

/// True iff both tokens are present, non-empty and equal.
pub fn validate_csrf_token(header_token: Option<&str>, cookie_token: Option<&str>) -> bool {
    match (header_token, cookie_token) {
        (Some(h), Some(c)) if !h.is_empty() && !c.is_empty() => {
            h.len() == c.len() && bool::from(h.as_bytes().ct_eq(c.as_bytes()))
        }
        _ => false,
    }
}

/// Check the header/cookie pair on a request.
pub fn verify_request(headers: &HeaderMap) -> bool {
    let header_token = headers.get(CSRF_HEADER).and_then(|v| v.to_str().ok());
    let cookie_token = cookie_value(headers, CSRF_COOKIE);
    validate_csrf_token(header_token, cookie_token)
}

/// Value of the named cookie across all `Cookie` headers.
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.trim())
}

/// `Set-Cookie` value issuing `token`.
///
/// Readable by scripts on purpose: the client must copy it into the header.
pub fn csrf_cookie(token: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(&format!(
        "{CSRF_COOKIE}={token}; Path=/; SameSite=Strict; Secure"
    ))
    .ok()
}
