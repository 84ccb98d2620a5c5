//! # Checkout Session Types
//!
//! Processor-owned checkout sessions as seen by this service.
//! Sessions are created by the processor and only ever read back here.

use crate::cart::GUEST_USER_ID;
use crate::error::{PaymentError, PaymentResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle of a hosted checkout session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created, awaiting the customer
    Open,
    /// Customer finished the flow
    Complete,
    /// Session timed out
    Expired,
    /// Anything the processor adds later
    Unknown(String),
}

impl SessionStatus {
    pub fn parse(value: &str) -> Self {
        match value {
            "open" => SessionStatus::Open,
            "complete" => SessionStatus::Complete,
            "expired" => SessionStatus::Expired,
            other => SessionStatus::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            SessionStatus::Open => "open",
            SessionStatus::Complete => "complete",
            SessionStatus::Expired => "expired",
            SessionStatus::Unknown(other) => other,
        }
    }
}

impl Default for SessionStatus {
    fn default() -> Self {
        SessionStatus::Open
    }
}

/// Payment state of a checkout session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Paid,
    Unpaid,
    NoPaymentRequired,
    Unknown(String),
}

impl PaymentStatus {
    pub fn parse(value: &str) -> Self {
        match value {
            "paid" => PaymentStatus::Paid,
            "unpaid" => PaymentStatus::Unpaid,
            "no_payment_required" => PaymentStatus::NoPaymentRequired,
            other => PaymentStatus::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PaymentStatus::Paid => "paid",
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::NoPaymentRequired => "no_payment_required",
            PaymentStatus::Unknown(other) => other,
        }
    }
}

impl Default for PaymentStatus {
    fn default() -> Self {
        PaymentStatus::Unpaid
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A checkout session returned by the payment processor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    /// Processor session id (`cs_...`)
    pub session_id: String,

    /// Session lifecycle status
    #[serde(default)]
    pub status: SessionStatus,

    /// Payment status
    #[serde(default)]
    pub payment_status: PaymentStatus,

    /// Hosted page URL (only present while open)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,

    /// Total in the smallest currency unit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_total: Option<i64>,

    /// ISO currency code, lowercase
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,

    /// Email the customer paid with
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,

    /// Metadata written at creation (`items`, `userId`, `timestamp`)
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// When the session expires
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// The processor's full JSON object
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl CheckoutSession {
    /// Create a minimal open session
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            status: SessionStatus::Open,
            payment_status: PaymentStatus::Unpaid,
            checkout_url: None,
            amount_total: None,
            currency: None,
            customer_email: None,
            metadata: HashMap::new(),
            expires_at: None,
            raw: serde_json::Value::Null,
        }
    }

    /// Only `paid` counts; `no_payment_required` does not grant a purchase
    pub fn is_paid(&self) -> bool {
        self.payment_status == PaymentStatus::Paid
    }

    /// Fail with `PaymentIncomplete` unless the session is paid
    pub fn ensure_paid(&self) -> PaymentResult<()> {
        if self.is_paid() {
            Ok(())
        } else {
            Err(PaymentError::PaymentIncomplete {
                session_id: self.session_id.clone(),
                payment_status: self.payment_status.to_string(),
            })
        }
    }

    /// Buyer recorded in metadata, `guest` when absent
    pub fn user_id(&self) -> &str {
        self.metadata
            .get("userId")
            .map(|s| s.as_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(GUEST_USER_ID)
    }

    /// Decode the purchased product ids from `metadata.items`.
    ///
    /// Missing or `null` means nothing was recorded. Numeric ids are accepted
    /// and rendered as strings.
    pub fn purchased_items(&self) -> PaymentResult<Vec<String>> {
        let Some(encoded) = self.metadata.get("items") else {
            return Ok(Vec::new());
        };

        let value: serde_json::Value = serde_json::from_str(encoded).map_err(|e| {
            PaymentError::InvalidMetadata(format!("items is not valid JSON: {}", e))
        })?;

        match value {
            serde_json::Value::Null => Ok(Vec::new()),
            serde_json::Value::Array(entries) => entries
                .into_iter()
                .map(|entry| match entry {
                    serde_json::Value::String(id) => Ok(id),
                    serde_json::Value::Number(n) => Ok(n.to_string()),
                    other => Err(PaymentError::InvalidMetadata(format!(
                        "unsupported item entry: {}",
                        other
                    ))),
                })
                .collect(),
            other => Err(PaymentError::InvalidMetadata(format!(
                "items must be an array, got {}",
                other
            ))),
        }
    }
}
