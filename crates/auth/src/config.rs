//! Configuration loaded from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};

/// Which identity provider implementation backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityBackend {
    /// Hosted auth + REST tables API.
    Rest,
    /// Process-local store, for local development and tests.
    Memory,
}

impl FromStr for IdentityBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "rest" => Ok(Self::Rest),
            "memory" => Ok(Self::Memory),
            other => bail!("unknown identity backend: {other}"),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port (default: 8888).
    pub port: u16,

    /// Identity provider implementation (default: rest).
    pub identity_backend: IdentityBackend,

    /// Base URL of the hosted identity/database provider.
    pub identity_url: String,

    /// Privileged (service-role) API key. Used for profile writes and
    /// compensating deletes.
    pub identity_service_key: String,

    /// Restricted (anonymous) API key. Used for sign-in and sign-up.
    pub identity_anon_key: String,

    /// Timeout applied to every outbound provider call (default: 10s).
    pub identity_timeout: Duration,

    /// The single origin allowed by CORS; echoed on every response.
    pub allowed_origin: String,

    /// Timeout for a whole inbound request (default: 30s).
    pub request_timeout: Duration,

    /// General limiter: points per window (default: 10).
    pub rate_limit_points: u32,

    /// General limiter window (default: 1s).
    pub rate_limit_window: Duration,

    /// Login limiter: points per window (default: 5).
    pub login_rate_limit_points: u32,

    /// Login limiter window (default: 300s).
    pub login_rate_limit_window: Duration,

    /// Shared counter store for rate limiting. When None, counters are
    /// kept in process memory.
    pub rate_limit_redis_url: Option<String>,

    /// Require a CSRF token on PUT as well as POST (default: false).
    pub csrf_protect_all_writes: bool,

    /// SMTP host for email delivery. When None, email is disabled.
    pub smtp_host: Option<String>,

    /// SMTP port (default: 587).
    pub smtp_port: u16,

    /// SMTP username for authentication.
    pub smtp_username: Option<String>,

    /// SMTP password for authentication.
    pub smtp_password: Option<String>,

    /// SMTP encryption mode: "starttls" (default), "tls", or "none".
    pub smtp_encryption: String,

    /// From address for outgoing email.
    pub email_from: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let port = parse_var("PORT", 8888u16).context("PORT must be a valid u16")?;

        let identity_backend: IdentityBackend = env::var("IDENTITY_BACKEND")
            .unwrap_or_else(|_| "rest".to_string())
            .parse()?;

        let (identity_url, identity_service_key, identity_anon_key) = match identity_backend {
            IdentityBackend::Rest => (
                env::var("IDENTITY_URL").context("IDENTITY_URL environment variable is required")?,
                env::var("IDENTITY_SERVICE_KEY")
                    .context("IDENTITY_SERVICE_KEY environment variable is required")?,
                env::var("IDENTITY_ANON_KEY")
                    .context("IDENTITY_ANON_KEY environment variable is required")?,
            ),
            IdentityBackend::Memory => (String::new(), String::new(), String::new()),
        };

        let identity_timeout = Duration::from_secs(
            parse_var("IDENTITY_TIMEOUT_SECS", 10u64)
                .context("IDENTITY_TIMEOUT_SECS must be a valid u64")?,
        );

        let allowed_origin = env::var("ALLOWED_ORIGIN")
            .unwrap_or_else(|_| format!("http://localhost:{port}"))
            .trim()
            .to_string();

        let request_timeout = Duration::from_secs(
            parse_var("REQUEST_TIMEOUT_SECS", 30u64)
                .context("REQUEST_TIMEOUT_SECS must be a valid u64")?,
        );

        let rate_limit_points = parse_var("RATE_LIMIT_POINTS", 10u32)
            .context("RATE_LIMIT_POINTS must be a valid u32")?;
        let rate_limit_window = Duration::from_secs(
            parse_var("RATE_LIMIT_WINDOW_SECS", 1u64)
                .context("RATE_LIMIT_WINDOW_SECS must be a valid u64")?,
        );

        let login_rate_limit_points = parse_var("LOGIN_RATE_LIMIT_POINTS", 5u32)
            .context("LOGIN_RATE_LIMIT_POINTS must be a valid u32")?;
        let login_rate_limit_window = Duration::from_secs(
            parse_var("LOGIN_RATE_LIMIT_WINDOW_SECS", 300u64)
                .context("LOGIN_RATE_LIMIT_WINDOW_SECS must be a valid u64")?,
        );

        let rate_limit_redis_url = env::var("RATE_LIMIT_REDIS_URL")
            .ok()
            .filter(|v| !v.trim().is_empty());

        let csrf_protect_all_writes = env::var("CSRF_PROTECT_ALL_WRITES")
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let smtp_host = env::var("SMTP_HOST").ok().filter(|v| !v.is_empty());

        let smtp_port = parse_var("SMTP_PORT", 587u16).context("SMTP_PORT must be a valid u16")?;

        let smtp_username = env::var("SMTP_USERNAME").ok();
        let smtp_password = env::var("SMTP_PASSWORD").ok();

        let smtp_encryption = env::var("SMTP_ENCRYPTION")
            .unwrap_or_else(|_| "starttls".to_string())
            .to_lowercase();

        let email_from =
            env::var("EMAIL_FROM").unwrap_or_else(|_| "Tenantdesk <noreply@localhost>".to_string());

        let config = Self {
            port,
            identity_backend,
            identity_url,
            identity_service_key,
            identity_anon_key,
            identity_timeout,
            allowed_origin,
            request_timeout,
            rate_limit_points,
            rate_limit_window,
            login_rate_limit_points,
            login_rate_limit_window,
            rate_limit_redis_url,
            csrf_protect_all_writes,
            smtp_host,
            smtp_port,
            smtp_username,
            smtp_password,
            smtp_encryption,
            email_from,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would disable or break a limiter or time out
    /// every request.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit_points == 0 {
            bail!("RATE_LIMIT_POINTS must be greater than zero");
        }
        if self.rate_limit_window.is_zero() {
            bail!("RATE_LIMIT_WINDOW_SECS must be greater than zero");
        }
        if self.login_rate_limit_points == 0 {
            bail!("LOGIN_RATE_LIMIT_POINTS must be greater than zero");
        }
        if self.login_rate_limit_window.is_zero() {
            bail!("LOGIN_RATE_LIMIT_WINDOW_SECS must be greater than zero");
        }
        if self.request_timeout.is_zero() {
            bail!("REQUEST_TIMEOUT_SECS must be greater than zero");
        }
        Ok(())
    }

    /// Configuration for local development and tests: in-memory identity
    /// store, no email, no shared counter store.
    pub fn for_memory_backend(allowed_origin: impl Into<String>) -> Self {
        Self {
            port: 8888,
            identity_backend: IdentityBackend::Memory,
            identity_url: String::new(),
            identity_service_key: String::new(),
            identity_anon_key: String::new(),
            identity_timeout: Duration::from_secs(10),
            allowed_origin: allowed_origin.into(),
            request_timeout: Duration::from_secs(30),
            rate_limit_points: 10,
            rate_limit_window: Duration::from_secs(1),
            login_rate_limit_points: 5,
            login_rate_limit_window: Duration::from_secs(300),
            rate_limit_redis_url: None,
            csrf_protect_all_writes: false,
            smtp_host: None,
            smtp_port: 587,
            smtp_username: None,
            smtp_password: None,
            smtp_encryption: "starttls".to_string(),
            email_from: "Tenantdesk <noreply@localhost>".to_string(),
        }
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(v) => Ok(v.trim().parse()?),
        Err(_) => Ok(default),
    }
}
