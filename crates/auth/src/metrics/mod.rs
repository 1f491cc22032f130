//! Prometheus metrics collection.
//!
//! Provides application metrics in Prometheus format.

use std::time::Instant;

use axum::body::Body;
use axum::extract::{MatchedPath, State};
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use prometheus_client::encoding::{EncodeLabelSet, text::encode};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;

use crate::state::AppState;

/// HTTP request labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HttpLabels {
    pub method: String,
    pub path: String,
    pub status: u16,
}

/// Rate limiter labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct LimiterLabels {
    pub limiter: String,
}

/// Auth action outcome labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct AuthLabels {
    pub action: String,
    pub outcome: String,
}

/// Application metrics.
pub struct Metrics {
    registry: Registry,

    /// HTTP request counter by method/path/status.
    pub http_requests: Family<HttpLabels, Counter>,

    /// HTTP request duration histogram.
    pub http_duration_seconds: Family<HttpLabels, Histogram>,

    /// Rate limit rejections by limiter.
    pub rate_limit_rejections: Family<LimiterLabels, Counter>,

    /// Auth actions by action and outcome.
    pub auth_actions: Family<AuthLabels, Counter>,

    /// Verification emails handed to the provider.
    pub emails_sent: Counter,

    /// Verification emails the provider refused.
    pub email_failures: Counter,
}

impl Metrics {
    /// Create a new metrics registry.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let http_requests = Family::<HttpLabels, Counter>::default();
        registry.register(
            "http_requests",
            "Total HTTP requests",
            http_requests.clone(),
        );

        let http_duration_seconds = Family::<HttpLabels, Histogram>::new_with_constructor(|| {
            Histogram::new(exponential_buckets(0.001, 2.0, 12))
        });
        registry.register(
            "http_request_duration_seconds",
            "HTTP request duration in seconds",
            http_duration_seconds.clone(),
        );

        let rate_limit_rejections = Family::<LimiterLabels, Counter>::default();
        registry.register(
            "rate_limit_rejections",
            "Rate limit rejections",
            rate_limit_rejections.clone(),
        );

        let auth_actions = Family::<AuthLabels, Counter>::default();
        registry.register(
            "auth_actions",
            "Auth actions by outcome",
            auth_actions.clone(),
        );

        let emails_sent = Counter::default();
        registry.register(
            "verification_emails_sent",
            "Verification emails sent",
            emails_sent.clone(),
        );

        let email_failures = Counter::default();
        registry.register(
            "verification_email_failures",
            "Verification emails that failed to send",
            email_failures.clone(),
        );

        Self {
            registry,
            http_requests,
            http_duration_seconds,
            rate_limit_rejections,
            auth_actions,
            emails_sent,
            email_failures,
        }
    }

    /// Record an HTTP request.
    pub fn record_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let labels = HttpLabels {
            method: method.to_string(),
            path: path.to_string(),
            status,
        };

        self.http_requests.get_or_create(&labels).inc();
        self.http_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Record a rate limit rejection.
    pub fn record_rate_limit(&self, limiter: &str) {
        self.rate_limit_rejections
            .get_or_create(&LimiterLabels {
                limiter: limiter.to_string(),
            })
            .inc();
    }

    /// Record the outcome of an auth action.
    pub fn record_auth(&self, action: &str, outcome: &str) {
        self.auth_actions
            .get_or_create(&AuthLabels {
                action: action.to_string(),
                outcome: outcome.to_string(),
            })
            .inc();
    }

    /// Record a verification email delivery attempt.
    pub fn record_email(&self, delivered: bool) {
        if delivered {
            self.emails_sent.inc();
        } else {
            self.email_failures.inc();
        }
    }

    /// Encode metrics in Prometheus text format.
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        // Prometheus encoding to String buffer is infallible
        #[allow(clippy::expect_used)]
        encode(&mut buffer, &self.registry).expect("encoding metrics");
        buffer
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish()
    }
}

/// Middleware recording request count and latency per matched route.
///
/// Unmatched paths share one label to keep cardinality bounded.
pub async fn track_requests(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;

    state.metrics().record_request(
        &method,
        &path,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}
