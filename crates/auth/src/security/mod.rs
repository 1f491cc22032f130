//! Request hardening: CSRF double-submit checks and input sanitization.

pub mod csrf;
pub mod sanitize;

pub use csrf::{generate_csrf_token, validate_csrf_token};
pub use sanitize::{
    html_escape, sanitize_input, sanitize_object, sanitize_text, validate_email, validate_phone,
};
