//! # checkout-api
//!
//! HTTP API layer for the workflow checkout backend.
//!
//! This crate provides:
//! - Axum-based HTTP server
//! - Checkout session creation and verification
//! - Stripe webhook receiver with idempotent fulfilment
//! - Token or bearer gated downloads
//!
//! ## Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | POST | `/api/create-checkout-session` | Create checkout session |
//! | GET | `/api/verify-session` | Verify payment, return download tokens |
//! | POST | `/api/webhooks/stripe` | Stripe webhook |
//! | GET | `/api/download/{product_id}` | Download purchased workflow |
//! | GET | `/api/health` | Health check |

pub mod auth;
pub mod handlers;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::{AppConfig, AppState};
