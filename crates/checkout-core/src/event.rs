//! # Webhook Event Types
//!
//! Verified processor events. Only produced after signature verification
//! succeeded, so holding a `WebhookEvent` means the payload is authentic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event kinds this service reacts to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventType {
    /// `checkout.session.completed`
    CheckoutSessionCompleted,
    /// `payment_intent.succeeded`
    PaymentIntentSucceeded,
    /// `invoice.payment_succeeded`
    InvoicePaymentSucceeded,
    /// Anything else (logged, ignored)
    Unknown(String),
}

impl WebhookEventType {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "checkout.session.completed" => WebhookEventType::CheckoutSessionCompleted,
            "payment_intent.succeeded" => WebhookEventType::PaymentIntentSucceeded,
            "invoice.payment_succeeded" => WebhookEventType::InvoicePaymentSucceeded,
            other => WebhookEventType::Unknown(other.to_string()),
        }
    }

    pub fn as_tag(&self) -> &str {
        match self {
            WebhookEventType::CheckoutSessionCompleted => "checkout.session.completed",
            WebhookEventType::PaymentIntentSucceeded => "payment_intent.succeeded",
            WebhookEventType::InvoicePaymentSucceeded => "invoice.payment_succeeded",
            WebhookEventType::Unknown(tag) => tag,
        }
    }
}

impl std::fmt::Display for WebhookEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// A verified webhook event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Event id from the processor (`evt_...`), the idempotency key
    pub event_id: String,

    /// Event type
    pub event_type: WebhookEventType,

    /// Provider name
    pub provider: String,

    /// `data.object` of the event
    pub object: serde_json::Value,

    /// Live or test mode
    #[serde(default)]
    pub livemode: bool,

    /// When the processor created the event
    pub created_at: DateTime<Utc>,
}

impl WebhookEvent {
    /// Id of the object the event is about (`cs_...`, `pi_...`, `in_...`)
    pub fn object_id(&self) -> Option<&str> {
        self.object.get("id").and_then(|v| v.as_str())
    }
}
