//! # Checkout Settings
//!
//! Tunables for the hosted checkout session and download tokens.
//! Loaded from `config/checkout.toml` when present, defaults otherwise.

use crate::error::{PaymentError, PaymentResult};
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Countries the hosted page collects shipping addresses for
pub const DEFAULT_ALLOWED_COUNTRIES: &[&str] = &[
    "US", "CA", "MX", "ES", "AR", "CO", "CL", "PE", "GB", "DE", "FR", "IT",
];

/// Default download token lifetime
pub const DEFAULT_TOKEN_TTL_DAYS: i64 = 7;

/// Upper bound on the token lifetime (ten years)
pub const MAX_TOKEN_TTL_DAYS: i64 = 3650;

/// Only card payments are offered on the hosted page
pub const CARD_PAYMENT_METHOD: &str = "card";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckoutSettings {
    /// ISO 3166-1 alpha-2 shipping allow-list
    pub allowed_countries: Vec<String>,

    /// Payment methods offered on the hosted page
    pub payment_method_types: Vec<String>,

    /// Let the processor compute tax
    pub automatic_tax: bool,

    /// Have the processor issue an invoice for one-time payments
    pub invoice_creation: bool,

    /// Lifetime of minted download tokens, in days
    pub token_ttl_days: i64,
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        Self {
            allowed_countries: DEFAULT_ALLOWED_COUNTRIES
                .iter()
                .map(|c| c.to_string())
                .collect(),
            payment_method_types: vec![CARD_PAYMENT_METHOD.to_string()],
            automatic_tax: true,
            invoice_creation: true,
            token_ttl_days: DEFAULT_TOKEN_TTL_DAYS,
        }
    }
}

impl CheckoutSettings {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> PaymentResult<Self> {
        let settings: CheckoutSettings = toml::from_str(content)
            .map_err(|e| PaymentError::Configuration(format!("invalid checkout settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> PaymentResult<()> {
        if let Some(bad) = self
            .allowed_countries
            .iter()
            .find(|c| c.len() != 2 || !c.chars().all(|ch| ch.is_ascii_uppercase()))
        {
            return Err(PaymentError::Configuration(format!(
                "allowed_countries entry '{}' is not an ISO alpha-2 code",
                bad
            )));
        }

        if self.payment_method_types.is_empty() {
            return Err(PaymentError::Configuration(
                "payment_method_types must not be empty".to_string(),
            ));
        }

        if let Some(bad) = self
            .payment_method_types
            .iter()
            .find(|m| m.as_str() != CARD_PAYMENT_METHOD)
        {
            return Err(PaymentError::Configuration(format!(
                "payment_method_types entry '{}' is not supported, only '{}'",
                bad, CARD_PAYMENT_METHOD
            )));
        }

        if self.token_ttl_days <= 0 || self.token_ttl_days > MAX_TOKEN_TTL_DAYS {
            return Err(PaymentError::Configuration(format!(
                "token_ttl_days must be between 1 and {}",
                MAX_TOKEN_TTL_DAYS
            )));
        }

        Ok(())
    }

    /// Token lifetime, clamped to `1..=MAX_TOKEN_TTL_DAYS` days
    pub fn token_ttl(&self) -> Duration {
        Duration::days(self.token_ttl_days.clamp(1, MAX_TOKEN_TTL_DAYS))
    }
}
