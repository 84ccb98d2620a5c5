//! # checkout-stripe
//!
//! Stripe Checkout processor for the workflow checkout backend.
//!
//! - **StripeProcessor** - Checkout Sessions API behind `PaymentProcessor`
//!   - Opaque cart items flattened into Stripe form encoding
//!   - Idempotency keys on every create call
//!   - Bounded retries with exponential backoff on 429/5xx/network errors
//! - **signature** - `Stripe-Signature` verification (HMAC-SHA256)
//! - **webhook** - handler trait, fulfilment handler, idempotent dispatch
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use checkout_stripe::StripeProcessor;
//! use checkout_core::PaymentProcessor;
//!
//! let processor = StripeProcessor::from_env()?;
//! let session = processor.create_checkout_session(&params).await?;
//! ```
//!
//! ## Webhook Handling
//!
//! ```rust,ignore
//! use checkout_stripe::{FulfillmentWebhookHandler, IdempotentDispatcher};
//!
//! let dispatcher = IdempotentDispatcher::new(
//!     Arc::new(FulfillmentWebhookHandler::new(fulfillment)),
//!     Arc::new(InMemoryProcessedEventStore::new()),
//! );
//!
//! // In your webhook endpoint:
//! let event = processor.verify_webhook(payload, signature).await?;
//! dispatcher.dispatch(&event).await?;
//! ```

pub mod checkout;
pub mod config;
pub mod form;
pub mod signature;
pub mod webhook;

// Re-exports
pub use checkout::{session_from_object, StripeProcessor};
pub use config::{StripeConfig, MAX_RETRIES, MAX_RETRY_DELAY};
pub use signature::{construct_event, signature_header, verify_signature};
pub use webhook::{
    dispatch_webhook_event, DispatchOutcome, FulfillmentWebhookHandler, IdempotentDispatcher,
    WebhookHandler,
};
