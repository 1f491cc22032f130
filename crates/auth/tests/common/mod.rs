#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Common test utilities for integration tests.
//!
//! Each [`TestApp`] drives the real router and state, backed by the
//! in-memory identity provider and an email transport that records what it
//! is asked to send.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, header};
use axum::response::Response;
use http_body_util::BodyExt;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tower::ServiceExt;

use tenantdesk_auth::config::Config;
use tenantdesk_auth::identity::MemoryIdentityProvider;
use tenantdesk_auth::middleware::RateLimiter;
use tenantdesk_auth::models::IdentityUser;
use tenantdesk_auth::routes::app_router;
use tenantdesk_auth::services::{EmailService, EmailTransport, OutgoingEmail};
use tenantdesk_auth::state::{AppState, limiter_configs};

/// Origin configured for every test app.
pub const ORIGIN: &str = "https://app.tenantdesk.test";

/// Client address sent with every request unless overridden.
pub const CLIENT_IP: &str = "198.51.100.7";

/// CSRF token placed in both the header and the cookie by [`with_csrf`].
pub const CSRF_TOKEN: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

/// Email transport that keeps every message instead of sending it.
#[derive(Default)]
pub struct CapturingTransport {
    sent: Mutex<Vec<OutgoingEmail>>,
    fail: AtomicBool,
}

impl CapturingTransport {
    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().clone()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl EmailTransport for CapturingTransport {
    async fn send(&self, email: &OutgoingEmail) -> anyhow::Result<String> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("smtp relay refused the message");
        }
        let mut sent = self.sent.lock();
        sent.push(email.clone());
        Ok(format!("<test-{}@tenantdesk.test>", sent.len()))
    }
}

/// Test application.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub identity: Arc<MemoryIdentityProvider>,
    pub mailer: Arc<CapturingTransport>,
}

impl TestApp {
    /// App with the documented quotas. The general window is widened to a
    /// minute so a slow test run cannot roll it over mid-test.
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        Self::build(config, true)
    }

    /// App with no email service configured.
    pub fn without_email() -> Self {
        Self::build(test_config(), false)
    }

    fn build(config: Config, with_email: bool) -> Self {
        let identity = Arc::new(MemoryIdentityProvider::new());
        let mailer = Arc::new(CapturingTransport::default());
        let (general, login) = limiter_configs(&config);
        let email = with_email.then(|| EmailService::new(mailer.clone()));

        let state = AppState::from_parts(
            config,
            identity.clone(),
            Arc::new(RateLimiter::in_memory("general", general)),
            Arc::new(RateLimiter::in_memory("login", login)),
            email,
        );
        let router = app_router(state.clone());

        Self {
            router,
            state,
            identity,
            mailer,
        }
    }

    /// Send a request through the full middleware stack.
    pub async fn request(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// POST a JSON body to `uri` with a valid CSRF pair.
    pub async fn post_json(&self, uri: &str, body: &Value) -> Response {
        let request = with_csrf(json_request(Method::POST, uri))
            .body(Body::from(body.to_string()))
            .unwrap();
        self.request(request).await
    }

    /// Create an account and return it with a live access token.
    pub fn seed_user(&self, email: &str, password: &str) -> (IdentityUser, String) {
        self.seed_user_with_metadata(email, password, Map::new())
    }

    pub fn seed_user_with_metadata(
        &self,
        email: &str,
        password: &str,
        metadata: Map<String, Value>,
    ) -> (IdentityUser, String) {
        let user = self.identity.seed_user(email, password, metadata);
        let token = self.identity.issue_token(&user.id);
        (user, token)
    }
}

/// Memory-backend config with a one-minute general window.
pub fn test_config() -> Config {
    let mut config = Config::for_memory_backend(ORIGIN);
    config.rate_limit_window = Duration::from_secs(60);
    config
}

/// Request builder carrying the test client address.
pub fn request(method: Method, uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("client-ip", CLIENT_IP)
}

/// Like [`request`] with a JSON content type.
pub fn json_request(method: Method, uri: &str) -> axum::http::request::Builder {
    request(method, uri).header(header::CONTENT_TYPE, "application/json")
}

/// Add a matching CSRF header and cookie.
pub fn with_csrf(builder: axum::http::request::Builder) -> axum::http::request::Builder {
    builder
        .header("x-csrf-token", CSRF_TOKEN)
        .header(header::COOKIE, format!("csrf_token={CSRF_TOKEN}"))
}

/// Add a bearer token.
pub fn with_bearer(builder: axum::http::request::Builder, token: &str) -> axum::http::request::Builder {
    builder.header(header::AUTHORIZATION, format!("Bearer {token}"))
}

pub async fn response_json(response: Response) -> Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap_or_else(|_| {
        let text = String::from_utf8_lossy(&body);
        panic!("Failed to parse JSON: {text}");
    })
}

pub async fn response_text(response: Response) -> String {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8_lossy(&body).to_string()
}

/// Cookie `name=value` pairs from `Set-Cookie` headers, without attributes.
pub fn extract_cookies(response: &Response) -> String {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|cookie| cookie.split(';').next())
        .collect::<Vec<_>>()
        .join("; ")
}
