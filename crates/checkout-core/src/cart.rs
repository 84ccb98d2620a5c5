//! # Cart Types
//!
//! The cart a client submits to `POST /api/create-checkout-session`.
//! Line items are opaque to us: they go to the processor exactly as received.

use crate::error::{PaymentError, PaymentResult};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use uuid::Uuid;

/// User id recorded when the client does not identify the buyer
pub const GUEST_USER_ID: &str = "guest";

/// Processor-side limit on a single metadata value
pub const MAX_METADATA_VALUE_LEN: usize = 500;

/// One processor line item (`price`/`price_data`, `quantity`, ...).
///
/// Kept as raw JSON so whatever the storefront sends is forwarded untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CartItem(pub serde_json::Value);

impl CartItem {
    pub fn as_json(&self) -> &serde_json::Value {
        &self.0
    }
}

impl From<serde_json::Value> for CartItem {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// Buyer and cart description carried into the session metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartMetadata {
    /// Purchased products (usually an array of product ids)
    #[serde(default)]
    pub items: Option<serde_json::Value>,

    /// Buyer id, `guest` when absent
    #[serde(default)]
    pub user_id: Option<String>,

    /// Prefill for the hosted checkout page
    #[serde(default)]
    pub customer_email: Option<String>,

    /// Client retry key; retries with the same key collapse onto one session
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Body of a create-checkout-session request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckoutRequest {
    #[serde(default)]
    pub items: Vec<CartItem>,

    #[serde(default)]
    pub metadata: CartMetadata,
}

impl CheckoutRequest {
    pub fn new(items: Vec<CartItem>, metadata: CartMetadata) -> Self {
        Self { items, metadata }
    }

    /// Reject carts the processor should never see
    pub fn validate(&self) -> PaymentResult<()> {
        if self.items.is_empty() {
            return Err(PaymentError::InvalidRequest(
                "Cart has no items".to_string(),
            ));
        }
        Ok(())
    }

    /// Buyer id, falling back to the guest marker
    pub fn user_id(&self) -> &str {
        self.metadata
            .user_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or(GUEST_USER_ID)
    }

    /// Customer email, ignoring blanks
    pub fn customer_email(&self) -> Option<&str> {
        self.metadata
            .customer_email
            .as_deref()
            .filter(|email| !email.trim().is_empty())
    }

    /// Metadata attached to the processor session: `items`, `userId`, `timestamp`.
    pub fn session_metadata(&self, now: DateTime<Utc>) -> PaymentResult<BTreeMap<String, String>> {
        let items = match &self.metadata.items {
            Some(items) => serde_json::to_string(items)?,
            None => "[]".to_string(),
        };

        let encoded_len = items.chars().count();
        if encoded_len > MAX_METADATA_VALUE_LEN {
            return Err(PaymentError::InvalidRequest(format!(
                "metadata.items encodes to {} characters (limit {})",
                encoded_len,
                MAX_METADATA_VALUE_LEN
            )));
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("items".to_string(), items);
        metadata.insert("userId".to_string(), self.user_id().to_string());
        metadata.insert(
            "timestamp".to_string(),
            now.to_rfc3339_opts(SecondsFormat::Millis, true),
        );
        Ok(metadata)
    }

    /// Idempotency key for the create call.
    ///
    /// With a client key the result is a digest of buyer, cart and key, so a
    /// retried request maps to the same processor session. Without one every
    /// request gets a fresh key.
    pub fn idempotency_key(&self) -> PaymentResult<String> {
        let Some(client_key) = self
            .metadata
            .idempotency_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
        else {
            return Ok(Uuid::new_v4().to_string());
        };

        let mut hasher = Sha256::new();
        hasher.update(self.user_id().as_bytes());
        hasher.update([0u8]);
        hasher.update(serde_json::to_vec(&self.items)?);
        hasher.update([0u8]);
        hasher.update(client_key.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }
}
