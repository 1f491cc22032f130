//! HTTP middleware components.
//!
//! Provides rate limiting, the request deadline and the response security
//! header layers.

pub mod rate_limit;
pub mod security_headers;
pub mod timeout;

pub use rate_limit::{RateLimitConfig, RateLimiter, get_client_id, login_key};
pub use security_headers::{api_content_security_policy, apply_security_headers, security_headers};
pub use timeout::enforce_request_timeout;
