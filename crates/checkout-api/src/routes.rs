//! # Routes
//!
//! Axum router configuration for the checkout API.

use crate::handlers;
use crate::state::AppState;
use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;

/// Create the main application router
///
/// Routes (all under `/api`):
///   - POST /create-checkout-session - Create hosted checkout session
///   - GET  /verify-session?session_id= - Confirm payment, get download tokens
///   - POST /webhooks/stripe - Stripe webhook handler (raw body)
///   - GET  /download/{product_id} - Purchased workflow file
///   - GET  /health - Health check
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.frontend_url);

    let api_routes = Router::new()
        .route(
            "/create-checkout-session",
            post(handlers::create_checkout_session),
        )
        .route("/verify-session", get(handlers::verify_session))
        .route("/webhooks/stripe", post(handlers::stripe_webhook))
        .route("/download/{product_id}", get(handlers::download))
        .route("/health", get(handlers::health));

    Router::new()
        .nest("/api", api_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Only the storefront origin may call the API, with credentials
fn cors_layer(frontend_url: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true);

    match HeaderValue::from_str(frontend_url.trim_end_matches('/')) {
        Ok(origin) => layer.allow_origin(origin),
        Err(_) => {
            warn!("FRONTEND_URL {:?} is not a valid origin, CORS disabled", frontend_url);
            layer
        }
    }
}
