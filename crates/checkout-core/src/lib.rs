//! # checkout-core
//!
//! Core types and traits for the workflow checkout backend.
//!
//! This crate provides:
//! - `PaymentProcessor` trait for the hosted-checkout provider
//! - `CheckoutRequest`, `CartItem` and `CheckoutSession` for the checkout flow
//! - `WebhookEvent` for verified processor events
//! - `PurchaseStore`, `TokenStore`, `ProcessedEventStore` with in-memory stores
//! - `PurchaseFulfillment` and `DownloadGate`
//! - `PaymentError` for typed error handling
//!
//! ## Example
//!
//! ```rust,ignore
//! use checkout_core::{CheckoutRequest, CheckoutSessionParams, CheckoutSettings, CheckoutUrls};
//!
//! let request: CheckoutRequest = serde_json::from_str(body)?;
//! let params = CheckoutSessionParams::from_request(
//!     &request,
//!     &CheckoutUrls::new("https://shop.example.com"),
//!     &CheckoutSettings::default(),
//!     chrono::Utc::now(),
//! )?;
//!
//! let session = processor.create_checkout_session(&params).await?;
//! // Hand session.session_id to the storefront for the redirect
//! ```

pub mod access;
pub mod cart;
pub mod error;
pub mod event;
pub mod fulfillment;
pub mod processor;
pub mod session;
pub mod settings;
pub mod store;

// Re-exports for convenience
pub use access::{validate_product_id, DownloadCredentials, DownloadGate};
pub use cart::{CartItem, CartMetadata, CheckoutRequest, GUEST_USER_ID};
pub use error::{PaymentError, PaymentResult};
pub use event::{WebhookEvent, WebhookEventType};
pub use fulfillment::{FulfillmentOutcome, LoggingNotifier, PurchaseFulfillment, PurchaseNotifier};
pub use processor::{
    CheckoutSessionParams, CheckoutUrls, PaymentProcessor, SharedPaymentProcessor,
};
pub use session::{CheckoutSession, PaymentStatus, SessionStatus};
pub use settings::CheckoutSettings;
pub use store::{
    DownloadToken, InMemoryProcessedEventStore, InMemoryPurchaseStore, InMemoryTokenStore,
    ProcessedEventStore, PurchaseRecord, PurchaseStore, TokenStore,
};
