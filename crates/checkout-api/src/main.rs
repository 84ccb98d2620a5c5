//! # checkout-server
//!
//! Checkout backend for the workflow storefront.
//!
//! ## Usage
//!
//! ```bash
//! # Set environment variables (or put them in .env)
//! export STRIPE_SECRET_KEY=sk_test_...
//! export STRIPE_WEBHOOK_SECRET=whsec_...
//! export FRONTEND_URL=http://localhost:3000
//!
//! # Run the server
//! checkout-server
//! ```

use checkout_api::{routes, state::AppState};
use checkout_core::TokenStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    // Initialize application state
    let state = AppState::new()?;

    let addr = state.config.socket_addr()?;

    info!("Environment: {}", state.config.environment);
    info!("Payment provider: {}", state.processor.provider_name());
    info!("Frontend: {}", state.config.frontend_url);
    info!("Downloads: {}", state.config.downloads_dir.display());
    if state.config.jwt_secret.is_none() {
        info!("JWT_SECRET not set, bearer downloads disabled");
    }

    spawn_token_purge(state.tokens.clone());

    // Create router
    let app = routes::create_router(state.clone());

    info!("Checkout server starting on http://{}", addr);

    if !state.config.is_production() {
        info!("Health: http://{}/api/health", addr);
        info!("Checkout: POST http://{}/api/create-checkout-session", addr);
        info!("Webhook: POST http://{}/api/webhooks/stripe", addr);
    }

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Drop expired download tokens once an hour
fn spawn_token_purge(tokens: Arc<dyn TokenStore>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        loop {
            interval.tick().await;
            match tokens.purge_expired(chrono::Utc::now()).await {
                Ok(0) => {}
                Ok(removed) => info!("Purged {} expired download tokens", removed),
                Err(e) => warn!("Token purge failed: {}", e),
            }
        }
    });
}

/// `LOG_FORMAT=json` switches to structured output
fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
}
