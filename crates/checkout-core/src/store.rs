//! # Purchase and Token Stores
//!
//! Storage seams for fulfilment and the download gate:
//!
//! - `PurchaseStore`: one record per paid session, insert is idempotent
//! - `TokenStore`: download tokens, lookup by token value
//! - `ProcessedEventStore`: webhook event ids already handled
//!
//! In-memory implementations back the server and the tests. A database
//! implementation only needs to honour the same contracts.

use crate::error::PaymentResult;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// A fulfilled purchase, keyed by processor session id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRecord {
    pub session_id: String,
    pub user_id: String,
    pub product_ids: Vec<String>,
    /// Total paid, smallest currency unit
    pub amount_total: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_email: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PurchaseRecord {
    pub fn includes(&self, product_id: &str) -> bool {
        self.product_ids.iter().any(|p| p == product_id)
    }
}

/// Credential granting one user access to one purchased file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadToken {
    pub token: String,
    pub user_id: String,
    pub product_id: String,
    pub session_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl DownloadToken {
    /// Mint a token with 32 random bytes, hex encoded
    pub fn issue(
        user_id: impl Into<String>,
        product_id: impl Into<String>,
        session_id: impl Into<String>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            token: generate_secure_token(),
            user_id: user_id.into(),
            product_id: product_id.into(),
            session_id: session_id.into(),
            issued_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// 64 hex characters from the thread-local CSPRNG
pub fn generate_secure_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[async_trait]
pub trait PurchaseStore: Send + Sync {
    /// Insert unless a record for the same session exists.
    ///
    /// Returns `true` when inserted, `false` when it was already present.
    async fn insert(&self, record: PurchaseRecord) -> PaymentResult<bool>;

    async fn get(&self, session_id: &str) -> PaymentResult<Option<PurchaseRecord>>;

    /// Whether any recorded purchase by `user_id` includes `product_id`
    async fn has_purchased(&self, user_id: &str, product_id: &str) -> PaymentResult<bool>;
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn save(&self, tokens: &[DownloadToken]) -> PaymentResult<()>;

    async fn find(&self, token: &str) -> PaymentResult<Option<DownloadToken>>;

    async fn for_session(&self, session_id: &str) -> PaymentResult<Vec<DownloadToken>>;

    /// Drop expired tokens, returning how many were removed
    async fn purge_expired(&self, now: DateTime<Utc>) -> PaymentResult<usize>;
}

/// Webhook event ids, claimed while in flight and kept once handled
#[async_trait]
pub trait ProcessedEventStore: Send + Sync {
    /// Atomically claim an event id.
    ///
    /// `false` means it is already handled or being handled elsewhere.
    async fn try_claim(&self, event_id: &str) -> PaymentResult<bool>;

    /// Mark a claimed event as handled for good
    async fn complete(&self, event_id: &str) -> PaymentResult<()>;

    /// Give a claim back so a redelivery can retry
    async fn release(&self, event_id: &str) -> PaymentResult<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryPurchaseStore {
    purchases: RwLock<HashMap<String, PurchaseRecord>>,
}

impl InMemoryPurchaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.purchases.read().await.len()
    }
}

#[async_trait]
impl PurchaseStore for InMemoryPurchaseStore {
    async fn insert(&self, record: PurchaseRecord) -> PaymentResult<bool> {
        let mut purchases = self.purchases.write().await;
        if purchases.contains_key(&record.session_id) {
            return Ok(false);
        }
        purchases.insert(record.session_id.clone(), record);
        Ok(true)
    }

    async fn get(&self, session_id: &str) -> PaymentResult<Option<PurchaseRecord>> {
        Ok(self.purchases.read().await.get(session_id).cloned())
    }

    async fn has_purchased(&self, user_id: &str, product_id: &str) -> PaymentResult<bool> {
        Ok(self
            .purchases
            .read()
            .await
            .values()
            .any(|p| p.user_id == user_id && p.includes(product_id)))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    tokens: RwLock<HashMap<String, DownloadToken>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn save(&self, tokens: &[DownloadToken]) -> PaymentResult<()> {
        let mut store = self.tokens.write().await;
        for token in tokens {
            store.insert(token.token.clone(), token.clone());
        }
        Ok(())
    }

    async fn find(&self, token: &str) -> PaymentResult<Option<DownloadToken>> {
        Ok(self.tokens.read().await.get(token).cloned())
    }

    async fn for_session(&self, session_id: &str) -> PaymentResult<Vec<DownloadToken>> {
        let mut tokens: Vec<_> = self
            .tokens
            .read()
            .await
            .values()
            .filter(|t| t.session_id == session_id)
            .cloned()
            .collect();
        tokens.sort_by(|a, b| a.product_id.cmp(&b.product_id));
        Ok(tokens)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> PaymentResult<usize> {
        let mut store = self.tokens.write().await;
        let before = store.len();
        store.retain(|_, t| !t.is_expired(now));
        Ok(before - store.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventState {
    InFlight,
    Done,
}

#[derive(Debug, Default)]
pub struct InMemoryProcessedEventStore {
    events: RwLock<HashMap<String, EventState>>,
}

impl InMemoryProcessedEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_processed(&self, event_id: &str) -> bool {
        self.events.read().await.get(event_id) == Some(&EventState::Done)
    }
}

#[async_trait]
impl ProcessedEventStore for InMemoryProcessedEventStore {
    async fn try_claim(&self, event_id: &str) -> PaymentResult<bool> {
        let mut events = self.events.write().await;
        if events.contains_key(event_id) {
            return Ok(false);
        }
        events.insert(event_id.to_string(), EventState::InFlight);
        Ok(true)
    }

    async fn complete(&self, event_id: &str) -> PaymentResult<()> {
        self.events
            .write()
            .await
            .insert(event_id.to_string(), EventState::Done);
        Ok(())
    }

    async fn release(&self, event_id: &str) -> PaymentResult<()> {
        let mut events = self.events.write().await;
        if events.get(event_id) == Some(&EventState::InFlight) {
            events.remove(event_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn purchase(session_id: &str, user_id: &str, products: &[&str]) -> PurchaseRecord {
        PurchaseRecord {
            session_id: session_id.into(),
            user_id: user_id.into(),
            product_ids: products.iter().map(|p| p.to_string()).collect(),
            amount_total: 4200,
            currency: Some("usd".into()),
            customer_email: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_token_generation() {
        let a = generate_secure_token();
        let b = generate_secure_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_token_expiry() {
        let now = Utc::now();
        let token = DownloadToken::issue("u1", "wf-1", "cs_1", now, Duration::days(7));
        assert!(!token.is_expired(now + Duration::days(6)));
        assert!(token.is_expired(now + Duration::days(7)));
    }

    #[tokio::test]
    async fn test_purchase_insert_is_idempotent() {
        let store = InMemoryPurchaseStore::new();
        assert!(store.insert(purchase("cs_1", "u1", &["wf-1"])).await.unwrap());
        assert!(!store.insert(purchase("cs_1", "u2", &["wf-2"])).await.unwrap());

        let stored = store.get("cs_1").await.unwrap().unwrap();
        assert_eq!(stored.user_id, "u1");
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn test_has_purchased() {
        let store = InMemoryPurchaseStore::new();
        store.insert(purchase("cs_1", "u1", &["wf-1", "wf-2"])).await.unwrap();

        assert!(store.has_purchased("u1", "wf-2").await.unwrap());
        assert!(!store.has_purchased("u1", "wf-3").await.unwrap());
        assert!(!store.has_purchased("u2", "wf-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_token_store_lookup_and_purge() {
        let store = InMemoryTokenStore::new();
        let now = Utc::now();
        let fresh = DownloadToken::issue("u1", "wf-1", "cs_1", now, Duration::days(7));
        let stale = DownloadToken::issue("u1", "wf-2", "cs_1", now - Duration::days(8), Duration::days(7));
        store.save(&[fresh.clone(), stale.clone()]).await.unwrap();

        assert_eq!(store.find(&fresh.token).await.unwrap(), Some(fresh.clone()));
        assert_eq!(store.for_session("cs_1").await.unwrap().len(), 2);
        assert!(store.find("nope").await.unwrap().is_none());

        assert_eq!(store.purge_expired(now).await.unwrap(), 1);
        assert!(store.find(&stale.token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_event_claims() {
        let store = InMemoryProcessedEventStore::new();

        assert!(store.try_claim("evt_1").await.unwrap());
        assert!(!store.try_claim("evt_1").await.unwrap());

        store.release("evt_1").await.unwrap();
        assert!(store.try_claim("evt_1").await.unwrap());

        store.complete("evt_1").await.unwrap();
        assert!(store.is_processed("evt_1").await);
        store.release("evt_1").await.unwrap();
        assert!(!store.try_claim("evt_1").await.unwrap());
    }
}
