//! # Purchase Fulfillment
//!
//! Turns a paid checkout session into a purchase record and download tokens.
//! Called from the `checkout.session.completed` webhook and from session
//! verification; both paths may race or repeat, so fulfilment is idempotent
//! per session id.

use crate::error::PaymentResult;
use crate::session::CheckoutSession;
use crate::store::{DownloadToken, PurchaseRecord, PurchaseStore, TokenStore};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Sends the purchase confirmation to the buyer
#[async_trait]
pub trait PurchaseNotifier: Send + Sync {
    async fn purchase_completed(
        &self,
        purchase: &PurchaseRecord,
        tokens: &[DownloadToken],
    ) -> PaymentResult<()>;
}

/// Notifier that only logs; no mail transport is wired in
pub struct LoggingNotifier;

#[async_trait]
impl PurchaseNotifier for LoggingNotifier {
    async fn purchase_completed(
        &self,
        purchase: &PurchaseRecord,
        tokens: &[DownloadToken],
    ) -> PaymentResult<()> {
        info!(
            session_id = %purchase.session_id,
            email = ?purchase.customer_email,
            tokens = tokens.len(),
            "Purchase confirmation (logging notifier)"
        );
        Ok(())
    }
}

/// Result of fulfilling one session
#[derive(Debug, Clone)]
pub struct FulfillmentOutcome {
    pub purchase: PurchaseRecord,
    pub tokens: Vec<DownloadToken>,
    /// `false` when the session had already been fulfilled
    pub newly_fulfilled: bool,
}

pub struct PurchaseFulfillment {
    purchases: Arc<dyn PurchaseStore>,
    tokens: Arc<dyn TokenStore>,
    notifier: Arc<dyn PurchaseNotifier>,
    token_ttl: Duration,
    // Held while checking and recording, so a duplicate always sees the first one's tokens
    guard: Mutex<()>,
}

impl PurchaseFulfillment {
    pub fn new(
        purchases: Arc<dyn PurchaseStore>,
        tokens: Arc<dyn TokenStore>,
        notifier: Arc<dyn PurchaseNotifier>,
        token_ttl: Duration,
    ) -> Self {
        Self {
            purchases,
            tokens,
            notifier,
            token_ttl,
            guard: Mutex::new(()),
        }
    }

    /// Record the purchase and mint one token per purchased product.
    ///
    /// Fails with `PaymentIncomplete` for unpaid sessions and
    /// `InvalidMetadata` when the item list cannot be decoded. A session that
    /// was already fulfilled returns its existing tokens.
    #[instrument(skip(self, session), fields(session_id = %session.session_id))]
    pub async fn fulfill(&self, session: &CheckoutSession) -> PaymentResult<FulfillmentOutcome> {
        session.ensure_paid()?;

        let mut product_ids = session.purchased_items()?;
        let mut seen = HashSet::new();
        product_ids.retain(|id| seen.insert(id.clone()));
        let user_id = session.user_id().to_string();
        let amount_total = session.amount_total.unwrap_or(0);

        let guard = self.guard.lock().await;

        if let Some(purchase) = self.purchases.get(&session.session_id).await? {
            debug!("Session already fulfilled");
            let tokens = self.tokens.for_session(&session.session_id).await?;
            return Ok(FulfillmentOutcome {
                purchase,
                tokens,
                newly_fulfilled: false,
            });
        }

        info!(
            user_id = %user_id,
            products = product_ids.len(),
            amount_total,
            currency = ?session.currency,
            "Payment received"
        );

        let now = Utc::now();
        let purchase = PurchaseRecord {
            session_id: session.session_id.clone(),
            user_id: user_id.clone(),
            product_ids: product_ids.clone(),
            amount_total,
            currency: session.currency.clone(),
            customer_email: session.customer_email.clone(),
            created_at: now,
        };

        let tokens: Vec<DownloadToken> = product_ids
            .iter()
            .map(|product_id| {
                DownloadToken::issue(&user_id, product_id, &session.session_id, now, self.token_ttl)
            })
            .collect();

        // A recorded purchase always has its tokens saved
        self.tokens.save(&tokens).await?;
        self.purchases.insert(purchase.clone()).await?;
        drop(guard);

        // Outside the lock: a slow notifier must not hold up other sessions
        if let Err(e) = self.notifier.purchase_completed(&purchase, &tokens).await {
            warn!(error = %e, "Purchase notification failed");
        }

        Ok(FulfillmentOutcome {
            purchase,
            tokens,
            newly_fulfilled: true,
        })
    }
}
