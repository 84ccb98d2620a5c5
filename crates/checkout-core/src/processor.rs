//! # Payment Processor Trait
//!
//! The seam between the HTTP layer and the payment processor.
//! The server is handed an `Arc<dyn PaymentProcessor>` at startup; tests hand
//! it a double.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 PaymentProcessor (trait)                    │
//! │  ├── create_checkout_session()                              │
//! │  ├── retrieve_session()                                     │
//! │  ├── verify_webhook()                                       │
//! │  └── provider_name()                                        │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                    ┌───────┴───────┐
//!                    │StripeProcessor│
//!                    └───────────────┘
//! ```

use crate::cart::{CartItem, CheckoutRequest};
use crate::error::PaymentResult;
use crate::event::WebhookEvent;
use crate::session::CheckoutSession;
use crate::settings::CheckoutSettings;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Placeholder the processor replaces with the real session id
pub const SESSION_ID_PLACEHOLDER: &str = "{CHECKOUT_SESSION_ID}";

/// Core trait for payment processor implementations.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Create a hosted checkout session.
    ///
    /// # Arguments
    /// * `params` - Everything the processor needs; built by
    ///   [`CheckoutSessionParams::from_request`]
    async fn create_checkout_session(
        &self,
        params: &CheckoutSessionParams,
    ) -> PaymentResult<CheckoutSession>;

    /// Fetch a session by id.
    async fn retrieve_session(&self, session_id: &str) -> PaymentResult<CheckoutSession>;

    /// Verify a webhook signature and parse the event.
    ///
    /// # Arguments
    /// * `payload` - Raw webhook body bytes, exactly as received
    /// * `signature` - Signature header from the request
    async fn verify_webhook(&self, payload: &[u8], signature: &str)
        -> PaymentResult<WebhookEvent>;

    /// Get the provider name (for logging and routing).
    fn provider_name(&self) -> &'static str;
}

/// Type alias for a shared processor (dynamic dispatch)
pub type SharedPaymentProcessor = Arc<dyn PaymentProcessor>;

/// Redirect targets for the hosted checkout page
#[derive(Debug, Clone)]
pub struct CheckoutUrls {
    /// Frontend origin (e.g., "https://shop.example.com")
    pub frontend_url: String,
    /// Success page path
    pub success_path: String,
    /// Cancel page path
    pub cancel_path: String,
}

impl CheckoutUrls {
    pub fn new(frontend_url: impl Into<String>) -> Self {
        Self {
            frontend_url: frontend_url.into().trim_end_matches('/').to_string(),
            success_path: "/success".to_string(),
            cancel_path: "/cancel".to_string(),
        }
    }

    /// Success URL carrying the session id placeholder
    pub fn success_url(&self) -> String {
        format!(
            "{}{}?session_id={}",
            self.frontend_url, self.success_path, SESSION_ID_PLACEHOLDER
        )
    }

    pub fn cancel_url(&self) -> String {
        format!("{}{}", self.frontend_url, self.cancel_path)
    }
}

impl Default for CheckoutUrls {
    fn default() -> Self {
        Self::new("http://localhost:3000")
    }
}

/// A fully-resolved create-session request
#[derive(Debug, Clone)]
pub struct CheckoutSessionParams {
    pub line_items: Vec<CartItem>,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: BTreeMap<String, String>,
    pub customer_email: Option<String>,
    pub payment_method_types: Vec<String>,
    pub automatic_tax: bool,
    pub invoice_creation: bool,
    pub allowed_countries: Vec<String>,
    pub idempotency_key: String,
}

impl CheckoutSessionParams {
    /// Resolve a client cart against the configured URLs and settings.
    ///
    /// Fails with `InvalidRequest` for an empty cart.
    pub fn from_request(
        request: &CheckoutRequest,
        urls: &CheckoutUrls,
        settings: &CheckoutSettings,
        now: DateTime<Utc>,
    ) -> PaymentResult<Self> {
        request.validate()?;

        Ok(Self {
            line_items: request.items.clone(),
            success_url: urls.success_url(),
            cancel_url: urls.cancel_url(),
            metadata: request.session_metadata(now)?,
            customer_email: request.customer_email().map(String::from),
            payment_method_types: settings.payment_method_types.clone(),
            automatic_tax: settings.automatic_tax,
            invoice_creation: settings.invoice_creation,
            allowed_countries: settings.allowed_countries.clone(),
            idempotency_key: request.idempotency_key()?,
        })
    }
}
