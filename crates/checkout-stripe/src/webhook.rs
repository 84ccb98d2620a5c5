//! # Stripe Webhook Handling
//!
//! Dispatch of verified webhook events to handler methods.
//! Stripe delivers at least once, so dispatch goes through
//! [`IdempotentDispatcher`], which runs each event id at most once to success.

use crate::checkout::session_from_object;
use async_trait::async_trait;
use checkout_core::{
    CheckoutSession, PaymentError, PaymentResult, ProcessedEventStore, PurchaseFulfillment, WebhookEvent,
    WebhookEventType,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Webhook event handler trait
///
/// Implement this trait to react to webhook events. Every method has a
/// logging default.
#[async_trait]
pub trait WebhookHandler: Send + Sync {
    /// Called when a checkout session is completed
    async fn on_checkout_session_completed(&self, session: CheckoutSession) -> PaymentResult<()> {
        info!(
            "Checkout completed: session={}, amount={:?}",
            session.session_id, session.amount_total
        );
        Ok(())
    }

    /// Called when a payment intent succeeds
    async fn on_payment_intent_succeeded(&self, event: &WebhookEvent) -> PaymentResult<()> {
        info!("PaymentIntent was successful: {:?}", event.object_id());
        Ok(())
    }

    /// Called when an invoice is paid
    async fn on_invoice_payment_succeeded(&self, event: &WebhookEvent) -> PaymentResult<()> {
        info!("Invoice paid: {:?}", event.object_id());
        Ok(())
    }

    /// Called for unknown/unhandled events
    async fn on_unknown_event(&self, event: &WebhookEvent) -> PaymentResult<()> {
        info!("Unhandled event type {}", event.event_type);
        Ok(())
    }
}

/// Fulfils purchases for completed checkout sessions
pub struct FulfillmentWebhookHandler {
    fulfillment: Arc<PurchaseFulfillment>,
}

impl FulfillmentWebhookHandler {
    pub fn new(fulfillment: Arc<PurchaseFulfillment>) -> Self {
        Self { fulfillment }
    }
}

#[async_trait]
impl WebhookHandler for FulfillmentWebhookHandler {
    async fn on_checkout_session_completed(&self, session: CheckoutSession) -> PaymentResult<()> {
        let outcome = self.fulfillment.fulfill(&session).await?;
        info!(
            session_id = %session.session_id,
            tokens = outcome.tokens.len(),
            newly_fulfilled = outcome.newly_fulfilled,
            "Checkout session fulfilled"
        );
        Ok(())
    }
}

/// Dispatch a webhook event to the appropriate handler method
pub async fn dispatch_webhook_event(
    handler: &dyn WebhookHandler,
    event: &WebhookEvent,
) -> PaymentResult<()> {
    match &event.event_type {
        WebhookEventType::CheckoutSessionCompleted => {
            let session = session_from_object(&event.object)?;
            handler.on_checkout_session_completed(session).await
        }
        WebhookEventType::PaymentIntentSucceeded => handler.on_payment_intent_succeeded(event).await,
        WebhookEventType::InvoicePaymentSucceeded => {
            handler.on_invoice_payment_succeeded(event).await
        }
        WebhookEventType::Unknown(_) => handler.on_unknown_event(event).await,
    }
}

/// What happened to a delivered event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled,
    /// Already handled (or being handled) under the same event id
    Duplicate,
}

/// Runs each event id through the handler at most once to success.
///
/// A failed handler gives its claim back, so a redelivery retries it. Once
/// claimed, an event is handled on its own task: dropping the `dispatch`
/// future (client disconnect, request timeout) does not strand the claim.
pub struct IdempotentDispatcher {
    handler: Arc<dyn WebhookHandler>,
    processed: Arc<dyn ProcessedEventStore>,
}

impl IdempotentDispatcher {
    pub fn new(handler: Arc<dyn WebhookHandler>, processed: Arc<dyn ProcessedEventStore>) -> Self {
        Self { handler, processed }
    }

    pub async fn dispatch(&self, event: &WebhookEvent) -> PaymentResult<DispatchOutcome> {
        if !self.processed.try_claim(&event.event_id).await? {
            debug!(event_id = %event.event_id, "Skipping duplicate webhook event");
            return Ok(DispatchOutcome::Duplicate);
        }

        let handler = self.handler.clone();
        let processed = self.processed.clone();
        let claimed = event.clone();
        let task = tokio::spawn(async move { run_claimed(handler, processed, claimed).await });

        match task.await {
            Ok(result) => result,
            Err(e) => {
                // The handler panicked; nothing else will release the claim
                warn!(event_id = %event.event_id, "Webhook handler task failed: {}", e);
                self.processed.release(&event.event_id).await?;
                Err(PaymentError::Internal(format!(
                    "webhook handler task failed: {}",
                    e
                )))
            }
        }
    }
}

async fn run_claimed(
    handler: Arc<dyn WebhookHandler>,
    processed: Arc<dyn ProcessedEventStore>,
    event: WebhookEvent,
) -> PaymentResult<DispatchOutcome> {
    match dispatch_webhook_event(handler.as_ref(), &event).await {
        Ok(()) => {
            processed.complete(&event.event_id).await?;
            Ok(DispatchOutcome::Handled)
        }
        Err(e) => {
            warn!(event_id = %event.event_id, error = %e, "Webhook handler failed");
            processed.release(&event.event_id).await?;
            Err(e)
        }
    }
}
