//! Application state shared across all handlers.

use std::sync::Arc;

use anyhow::{Context, Result};
use redis::Client as RedisClient;
use tracing::info;

use crate::config::{Config, IdentityBackend};
use crate::identity::{IdentityProvider, MemoryIdentityProvider, RestIdentityProvider};
use crate::metrics::Metrics;
use crate::middleware::{RateLimitConfig, RateLimiter};
use crate::services::{EmailService, SmtpTransport};

/// Shared application state.
///
/// Wrapped in Arc internally so Clone is cheap.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,

    /// Authoritative identity and profile store.
    identity: Arc<dyn IdentityProvider>,

    /// Applied to every request, keyed by client IP.
    general_limiter: Arc<RateLimiter>,

    /// Applied to login attempts, keyed by `login_` + client IP.
    login_limiter: Arc<RateLimiter>,

    /// Verification email delivery (None when SMTP is not configured).
    email: Option<EmailService>,

    metrics: Arc<Metrics>,
}

impl AppState {
    /// Build state from configuration: identity backend, limiters, email.
    pub fn new(config: &Config) -> Result<Self> {
        let identity: Arc<dyn IdentityProvider> = match config.identity_backend {
            IdentityBackend::Rest => Arc::new(
                RestIdentityProvider::new(
                    &config.identity_url,
                    config.identity_service_key.clone(),
                    config.identity_anon_key.clone(),
                    config.identity_timeout,
                )
                .context("failed to create identity provider client")?,
            ),
            IdentityBackend::Memory => {
                tracing::warn!("using in-memory identity store; accounts are not persisted");
                Arc::new(MemoryIdentityProvider::new())
            }
        };

        let (general_config, login_config) = limiter_configs(config);
        let (general_limiter, login_limiter) = match &config.rate_limit_redis_url {
            Some(url) => {
                let redis = RedisClient::open(url.as_str())
                    .context("failed to create Redis client for rate limiting")?;
                info!("rate limit counters shared through Redis");
                (
                    RateLimiter::with_redis("general", redis.clone(), general_config),
                    RateLimiter::with_redis("login", redis, login_config),
                )
            }
            None => (
                RateLimiter::in_memory("general", general_config),
                RateLimiter::in_memory("login", login_config),
            ),
        };

        // Initialize email service (conditionally, when SMTP_HOST is set)
        let email = config.smtp_host.as_ref().and_then(|host| {
            match SmtpTransport::new(
                host,
                config.smtp_port,
                config.smtp_username.as_deref(),
                config.smtp_password.as_deref(),
                &config.smtp_encryption,
                &config.email_from,
            ) {
                Ok(transport) => {
                    info!(host = %host, port = config.smtp_port, "SMTP email service configured");
                    Some(EmailService::new(Arc::new(transport)))
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to initialize email service");
                    None
                }
            }
        });

        Ok(Self::from_parts(
            config.clone(),
            identity,
            Arc::new(general_limiter),
            Arc::new(login_limiter),
            email,
        ))
    }

    /// Assemble state from already-built collaborators.
    pub fn from_parts(
        config: Config,
        identity: Arc<dyn IdentityProvider>,
        general_limiter: Arc<RateLimiter>,
        login_limiter: Arc<RateLimiter>,
        email: Option<EmailService>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                identity,
                general_limiter,
                login_limiter,
                email,
                metrics: Arc::new(Metrics::new()),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn identity(&self) -> &Arc<dyn IdentityProvider> {
        &self.inner.identity
    }

    pub fn general_limiter(&self) -> &Arc<RateLimiter> {
        &self.inner.general_limiter
    }

    pub fn login_limiter(&self) -> &Arc<RateLimiter> {
        &self.inner.login_limiter
    }

    /// Get the email service (if SMTP is configured).
    pub fn email(&self) -> Option<&EmailService> {
        self.inner.email.as_ref()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.inner.metrics
    }
}

/// General and login limiter settings derived from configuration.
///
/// `Retry-After` keeps the documented values (60s and 300s) whatever the
/// configured windows are.
pub fn limiter_configs(config: &Config) -> (RateLimitConfig, RateLimitConfig) {
    let general = RateLimitConfig {
        points: config.rate_limit_points,
        window: config.rate_limit_window,
        ..RateLimitConfig::general()
    };
    let login = RateLimitConfig {
        points: config.login_rate_limit_points,
        window: config.login_rate_limit_window,
        ..RateLimitConfig::login()
    };
    (general, login)
}
