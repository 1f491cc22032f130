//! Tenantdesk auth service binary.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use tenantdesk_auth::config::Config;
use tenantdesk_auth::routes::app_router;
use tenantdesk_auth::state::AppState;

/// How often expired in-memory rate limit windows are swept.
const LIMITER_PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting Tenantdesk auth service");

    let config = Config::from_env().context("failed to load configuration")?;
    info!(
        port = config.port,
        identity = ?config.identity_backend,
        origin = %config.allowed_origin,
        "Configuration loaded"
    );

    let state = AppState::new(&config).context("failed to initialize application state")?;

    spawn_limiter_purge(state.clone());

    let app = app_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind to address")?;

    info!(%addr, "Server listening");

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

/// Periodically drop rate limit entries whose window has ended so the
/// in-memory table does not grow with every client ever seen.
fn spawn_limiter_purge(state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(LIMITER_PURGE_INTERVAL);
        loop {
            interval.tick().await;
            let general = state.general_limiter().purge_expired();
            let login = state.login_limiter().purge_expired();
            if general + login > 0 {
                let tracked =
                    state.general_limiter().tracked_keys() + state.login_limiter().tracked_keys();
                debug!(general, login, tracked, "purged expired rate limit windows");
            }
        }
    });
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
