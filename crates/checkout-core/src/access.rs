//! # Download Access
//!
//! Decides whether a caller may download a purchased file. Access is denied
//! unless a credential proves it.

use crate::cart::GUEST_USER_ID;
use crate::error::{PaymentError, PaymentResult};
use crate::store::{PurchaseStore, TokenStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

/// What the caller presented
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadCredentials {
    /// `?userId=&token=` from the purchase email / verify response
    Token { user_id: String, token: String },
    /// User id taken from a verified bearer credential
    Authenticated { user_id: String },
    /// Nothing usable
    Anonymous,
}

impl DownloadCredentials {
    /// Build from the optional query pair; either half missing means anonymous
    pub fn from_query(user_id: Option<String>, token: Option<String>) -> Self {
        match (user_id, token) {
            (Some(user_id), Some(token)) if !user_id.is_empty() && !token.is_empty() => {
                DownloadCredentials::Token { user_id, token }
            }
            _ => DownloadCredentials::Anonymous,
        }
    }
}

/// Product ids become file names, so only `[A-Za-z0-9_-]` is accepted
pub fn validate_product_id(product_id: &str) -> PaymentResult<()> {
    let valid = !product_id.is_empty()
        && product_id.len() <= 128
        && product_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if valid {
        Ok(())
    } else {
        Err(PaymentError::InvalidRequest(format!(
            "invalid product id: {:?}",
            product_id
        )))
    }
}

pub struct DownloadGate {
    purchases: Arc<dyn PurchaseStore>,
    tokens: Arc<dyn TokenStore>,
}

impl DownloadGate {
    pub fn new(purchases: Arc<dyn PurchaseStore>, tokens: Arc<dyn TokenStore>) -> Self {
        Self { purchases, tokens }
    }

    /// `Ok(())` when access is granted, `AccessDenied` otherwise.
    ///
    /// A token grants access when it exists, belongs to the caller and the
    /// product, and has not expired. Tokens stay valid until expiry.
    pub async fn check(
        &self,
        product_id: &str,
        credentials: &DownloadCredentials,
        now: DateTime<Utc>,
    ) -> PaymentResult<()> {
        validate_product_id(product_id)?;

        let granted = match credentials {
            DownloadCredentials::Token { user_id, token } => {
                match self.tokens.find(token).await? {
                    Some(stored) => {
                        let ok = stored.user_id == *user_id
                            && stored.product_id == product_id
                            && !stored.is_expired(now);
                        if !ok {
                            debug!(product_id, "Token does not match request or is expired");
                        }
                        ok
                    }
                    None => false,
                }
            }
            // Guest purchases belong to nobody in particular; only their tokens open them
            DownloadCredentials::Authenticated { user_id } if user_id == GUEST_USER_ID => {
                debug!(product_id, "Bearer subject is the guest marker");
                false
            }
            DownloadCredentials::Authenticated { user_id } => {
                self.purchases.has_purchased(user_id, product_id).await?
            }
            DownloadCredentials::Anonymous => false,
        };

        if granted {
            Ok(())
        } else {
            Err(PaymentError::AccessDenied {
                product_id: product_id.to_string(),
            })
        }
    }
}
