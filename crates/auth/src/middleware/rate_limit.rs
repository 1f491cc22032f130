//! Fixed-window rate limiting.
//!
//! Each key gets `points` requests per `window`. Windows reset lazily: the
//! first request after a window has passed starts a new one. Counters live
//! in process memory by default, or in Redis when several instances must
//! share them.

use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use dashmap::DashMap;
use redis::Client as RedisClient;
use tracing::{debug, warn};

/// Prefix for the login limiter's keys.
pub const LOGIN_KEY_PREFIX: &str = "login_";

/// Rate limit configuration for one limiter instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Requests allowed per window.
    pub points: u32,
    /// Window length.
    pub window: Duration,
    /// `Retry-After` seconds returned to rejected clients.
    pub retry_after_secs: u64,
}

impl RateLimitConfig {
    /// Limiter applied to every request: 10 per second, retry after 60s.
    pub fn general() -> Self {
        Self {
            points: 10,
            window: Duration::from_secs(1),
            retry_after_secs: 60,
        }
    }

    /// Limiter applied to login attempts: 5 per 5 minutes, retry after 300s.
    pub fn login() -> Self {
        Self {
            points: 5,
            window: Duration::from_secs(300),
            retry_after_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    count: u32,
    started: Instant,
}

enum Backend {
    Memory(DashMap<String, WindowState>),
    Redis(RedisClient),
}

/// Fixed-window rate limiter.
pub struct RateLimiter {
    name: &'static str,
    config: RateLimitConfig,
    backend: Backend,
}

impl RateLimiter {
    /// Create a limiter that keeps counters in process memory.
    ///
    /// Only correct within a single instance.
    pub fn in_memory(name: &'static str, config: RateLimitConfig) -> Self {
        Self {
            name,
            config,
            backend: Backend::Memory(DashMap::new()),
        }
    }

    /// Create a limiter backed by a shared Redis counter store.
    pub fn with_redis(name: &'static str, redis: RedisClient, config: RateLimitConfig) -> Self {
        Self {
            name,
            config,
            backend: Backend::Redis(redis),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Consume one point for `key`. Returns false when the quota for the
    /// current window is exhausted.
    pub async fn try_consume(&self, key: &str) -> bool {
        match &self.backend {
            Backend::Memory(counters) => self.consume_local(counters, key, Instant::now()),
            Backend::Redis(redis) => self.consume_shared(redis, key).await,
        }
    }

    /// Like [`try_consume`](Self::try_consume) but returns the `Retry-After`
    /// seconds on rejection.
    pub async fn check(&self, key: &str) -> Result<(), u64> {
        if self.try_consume(key).await {
            Ok(())
        } else {
            debug!(limiter = self.name, key = key, "rate limit exceeded");
            Err(self.config.retry_after_secs)
        }
    }

    fn consume_local(
        &self,
        counters: &DashMap<String, WindowState>,
        key: &str,
        now: Instant,
    ) -> bool {
        let mut entry = counters.entry(key.to_string()).or_insert(WindowState {
            count: 0,
            started: now,
        });
        let state = entry.value_mut();

        if now.saturating_duration_since(state.started) >= self.config.window {
            state.count = 0;
            state.started = now;
        }

        if state.count < self.config.points {
            state.count += 1;
            true
        } else {
            false
        }
    }

    /// Increment the shared counter; INCR + PEXPIRE run atomically so a
    /// crash between them cannot leave an immortal counter.
    async fn consume_shared(&self, redis: &RedisClient, key: &str) -> bool {
        let redis_key = format!("rate:{}:{key}", self.name);
        let window_ms = self.config.window.as_millis().max(1) as i64;

        let result: Result<i64, redis::RedisError> = async {
            let mut conn = redis.get_multiplexed_async_connection().await?;
            let script = redis::Script::new(
                r"local count = redis.call('INCR', KEYS[1])
                  if count == 1 then
                    redis.call('PEXPIRE', KEYS[1], ARGV[1])
                  end
                  return count",
            );
            script
                .key(&redis_key)
                .arg(window_ms)
                .invoke_async(&mut conn)
                .await
        }
        .await;

        match result {
            Ok(count) => count <= i64::from(self.config.points),
            Err(e) => {
                // Fail open: a broken counter store must not take auth down.
                warn!(limiter = self.name, error = %e, "rate limit check failed, allowing request");
                true
            }
        }
    }

    /// Drop in-memory counters whose window has ended. Returns the number of
    /// entries removed. No-op for the Redis backend, where keys expire.
    pub fn purge_expired(&self) -> usize {
        match &self.backend {
            Backend::Memory(counters) => self.purge_local(counters, Instant::now()),
            Backend::Redis(_) => 0,
        }
    }

    fn purge_local(&self, counters: &DashMap<String, WindowState>, now: Instant) -> usize {
        let before = counters.len();
        let window = self.config.window;
        counters.retain(|_, state| now.saturating_duration_since(state.started) < window);
        before.saturating_sub(counters.len())
    }

    /// Number of tracked keys (in-memory backend only).
    pub fn tracked_keys(&self) -> usize {
        match &self.backend {
            Backend::Memory(counters) => counters.len(),
            Backend::Redis(_) => 0,
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match self.backend {
            Backend::Memory(_) => "memory",
            Backend::Redis(_) => "redis",
        };
        f.debug_struct("RateLimiter")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("backend", &backend)
            .finish()
    }
}

/// Client identifier (IP address) for rate limiting.
///
/// Uses the `client-ip` header, then the first entry of `x-forwarded-for`,
/// else `"unknown"`.
pub fn get_client_id(headers: &HeaderMap) -> String {
    if let Some(ip) = headers
        .get("client-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return ip.to_string();
    }

    if let Some(forwarded) = headers.get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
        && let Some(ip) = value.split(',').next().map(str::trim)
        && !ip.is_empty()
    {
        return ip.to_string();
    }

    "unknown".to_string()
}

/// Key for the login limiter.
pub fn login_key(client_id: &str) -> String {
    format!("{LOGIN_KEY_PREFIX}{client_id}")
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn counters(limiter: &RateLimiter) -> &DashMap<String, WindowState> {
        match &limiter.backend {
            Backend::Memory(c) => c,
            Backend::Redis(_) => unreachable!("test limiter is in-memory"),
        }
    }

    #[test]
    fn test_default_configs() {
        let general = RateLimitConfig::general();
        assert_eq!(general.points, 10);
        assert_eq!(general.window, Duration::from_secs(1));
        assert_eq!(general.retry_after_secs, 60);

        let login = RateLimitConfig::login();
        assert_eq!(login.retry_after_secs, 300);
    }

    #[test]
    fn eleventh_request_in_window_is_rejected() {
        let limiter = RateLimiter::in_memory("general", RateLimitConfig::general());
        let now = Instant::now();
        for _ in 0..10 {
            assert!(limiter.consume_local(counters(&limiter), "1.2.3.4", now));
        }
        assert!(!limiter.consume_local(counters(&limiter), "1.2.3.4", now));
        assert!(!limiter.consume_local(
            counters(&limiter),
            "1.2.3.4",
            now + Duration::from_millis(999)
        ));
    }

    #[test]
    fn window_resets_after_expiry() {
        let limiter = RateLimiter::in_memory("general", RateLimitConfig::general());
        let now = Instant::now();
        for _ in 0..10 {
            limiter.consume_local(counters(&limiter), "k", now);
        }
        assert!(!limiter.consume_local(counters(&limiter), "k", now));
        assert!(limiter.consume_local(counters(&limiter), "k", now + Duration::from_secs(1)));
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::in_memory("general", RateLimitConfig::general());
        let now = Instant::now();
        for _ in 0..10 {
            limiter.consume_local(counters(&limiter), "a", now);
        }
        assert!(!limiter.consume_local(counters(&limiter), "a", now));
        assert!(limiter.consume_local(counters(&limiter), "b", now));
    }

    #[tokio::test]
    async fn check_returns_retry_after() {
        let limiter = RateLimiter::in_memory("login", RateLimitConfig::login());
        for _ in 0..5 {
            assert!(limiter.check("login_1.2.3.4").await.is_ok());
        }
        assert_eq!(limiter.check("login_1.2.3.4").await, Err(300));
    }

    #[test]
    fn purge_drops_only_expired_windows() {
        let limiter = RateLimiter::in_memory("general", RateLimitConfig::general());
        let now = Instant::now();
        limiter.consume_local(counters(&limiter), "old", now);
        limiter.consume_local(counters(&limiter), "new", now + Duration::from_secs(2));

        let removed = limiter.purge_local(counters(&limiter), now + Duration::from_secs(2));
        assert_eq!(removed, 1);
        assert_eq!(limiter.tracked_keys(), 1);
        assert!(counters(&limiter).contains_key("new"));
    }

    #[test]
    fn client_id_prefers_client_ip_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "10.0.0.1, 10.0.0.2".parse().unwrap());
        assert_eq!(get_client_id(&headers), "10.0.0.1");

        headers.insert("client-ip", "203.0.113.9".parse().unwrap());
        assert_eq!(get_client_id(&headers), "203.0.113.9");

        assert_eq!(get_client_id(&HeaderMap::new()), "unknown");
    }

    #[test]
    fn login_key_prefixes_client() {
        assert_eq!(login_key("1.2.3.4"), "login_1.2.3.4");
    }
}
