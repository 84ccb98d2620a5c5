//! Router-level tests against a mock processor.

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use checkout_api::{create_router, AppConfig, AppState};
use checkout_core::{
    CheckoutSession, CheckoutSessionParams, CheckoutSettings, DownloadToken, PaymentError,
    PaymentProcessor, PaymentResult, PaymentStatus, PurchaseNotifier, PurchaseRecord,
    TokenStore, WebhookEvent,
};
use checkout_stripe::{construct_event, signature_header};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const WEBHOOK_SECRET: &str = "whsec_test_secret";
const JWT_SECRET: &str = "jwt-test-secret";

#[derive(Default)]
struct MockProcessor {
    created: Mutex<Vec<CheckoutSessionParams>>,
    sessions: HashMap<String, CheckoutSession>,
}

impl MockProcessor {
    fn with_session(mut self, session: CheckoutSession) -> Self {
        self.sessions.insert(session.session_id.clone(), session);
        self
    }

    fn create_calls(&self) -> usize {
        self.created.lock().unwrap().len()
    }
}

#[async_trait]
impl PaymentProcessor for MockProcessor {
    async fn create_checkout_session(
        &self,
        params: &CheckoutSessionParams,
    ) -> PaymentResult<CheckoutSession> {
        self.created.lock().unwrap().push(params.clone());
        Ok(CheckoutSession::new("cs_test_a1b2c3"))
    }

    async fn retrieve_session(&self, session_id: &str) -> PaymentResult<CheckoutSession> {
        self.sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| PaymentError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    async fn verify_webhook(&self, payload: &[u8], signature: &str) -> PaymentResult<WebhookEvent> {
        construct_event(payload, signature, WEBHOOK_SECRET, 300, Utc::now())
    }

    fn provider_name(&self) -> &'static str {
        "stripe"
    }
}

#[derive(Default)]
struct CountingNotifier {
    calls: AtomicUsize,
}

#[async_trait]
impl PurchaseNotifier for CountingNotifier {
    async fn purchase_completed(
        &self,
        _purchase: &PurchaseRecord,
        _tokens: &[DownloadToken],
    ) -> PaymentResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    server: TestServer,
    state: AppState,
    processor: Arc<MockProcessor>,
    notifier: Arc<CountingNotifier>,
    downloads: TempDir,
}

fn paid_session(id: &str, status: PaymentStatus) -> CheckoutSession {
    let mut session = CheckoutSession::new(id);
    session.payment_status = status;
    session.amount_total = Some(4998);
    session.currency = Some("usd".to_string());
    session
        .metadata
        .insert("items".to_string(), r#"["wf-1","wf-2"]"#.to_string());
    session
        .metadata
        .insert("userId".to_string(), "u1".to_string());
    session.raw = json!({"id": id, "object": "checkout.session"});
    session
}

fn harness(processor: MockProcessor) -> Harness {
    let downloads = tempfile::tempdir().unwrap();
    std::fs::write(downloads.path().join("wf-1.json"), r#"{"nodes":[]}"#).unwrap();

    let config = AppConfig {
        downloads_dir: downloads.path().to_path_buf(),
        jwt_secret: Some(JWT_SECRET.to_string()),
        ..AppConfig::default()
    };

    let processor = Arc::new(processor);
    let notifier = Arc::new(CountingNotifier::default());
    let state = AppState::assemble(
        config,
        CheckoutSettings::default(),
        processor.clone(),
        notifier.clone(),
    );

    Harness {
        server: TestServer::new(create_router(state.clone())).unwrap(),
        state,
        processor,
        notifier,
        downloads,
    }
}

fn completed_event_body(event_id: &str, session_id: &str) -> Vec<u8> {
    completed_event_body_for(event_id, session_id, "u1", r#"["wf-1"]"#)
}

fn completed_event_body_for(event_id: &str, session_id: &str, user_id: &str, items: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": event_id,
        "object": "event",
        "type": "checkout.session.completed",
        "created": Utc::now().timestamp(),
        "livemode": false,
        "data": {
            "object": {
                "id": session_id,
                "object": "checkout.session",
                "payment_status": "paid",
                "status": "complete",
                "amount_total": 1999,
                "currency": "usd",
                "metadata": {"items": items, "userId": user_id}
            }
        }
    }))
    .unwrap()
}

async fn post_webhook(server: &TestServer, body: &[u8], secret: &str) -> axum_test::TestResponse {
    let signature = signature_header(body, secret, Utc::now().timestamp());
    server
        .post("/api/webhooks/stripe")
        .add_header(
            HeaderName::from_static("stripe-signature"),
            HeaderValue::from_str(&signature).unwrap(),
        )
        .bytes(Bytes::copy_from_slice(body))
        .await
}

#[tokio::test]
async fn test_health() {
    let h = harness(MockProcessor::default());

    let response = h.server.get("/api/health").await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["stripe"], "connected");
    assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));
}

#[tokio::test]
async fn test_create_session_returns_processor_id() {
    let h = harness(MockProcessor::default());

    let response = h
        .server
        .post("/api/create-checkout-session")
        .json(&json!({
            "items": [{"price": "price_123", "quantity": 2}],
            "metadata": {"userId": "u1"}
        }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body, json!({"sessionId": "cs_test_a1b2c3"}));

    let created = h.processor.created.lock().unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].metadata.get("userId").map(String::as_str), Some("u1"));
    assert_eq!(created[0].metadata.get("items").map(String::as_str), Some("[]"));
    assert_eq!(
        created[0].success_url,
        "http://localhost:3000/success?session_id={CHECKOUT_SESSION_ID}"
    );
}

#[tokio::test]
async fn test_empty_cart_never_reaches_processor() {
    let h = harness(MockProcessor::default());

    for body in [json!({"items": []}), json!({"metadata": {"userId": "u1"}})] {
        let response = h.server.post("/api/create-checkout-session").json(&body).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert!(body["error"].as_str().is_some());
    }

    assert_eq!(h.processor.create_calls(), 0);
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let h = harness(MockProcessor::default());

    let response = h
        .server
        .post("/api/create-checkout-session")
        .add_header(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))
        .bytes(Bytes::from_static(b"{not json"))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(h.processor.create_calls(), 0);
}

#[tokio::test]
async fn test_verify_paid_session_returns_tokens() {
    let h = harness(
        MockProcessor::default().with_session(paid_session("cs_paid", PaymentStatus::Paid)),
    );

    let response = h.server.get("/api/verify-session?session_id=cs_paid").await;
    response.assert_status_ok();

    let body: Value = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["session"]["id"], "cs_paid");
    assert_eq!(body["purchasedItems"], json!(["wf-1", "wf-2"]));

    let tokens = body["downloadTokens"].as_array().unwrap();
    assert_eq!(tokens.len(), 2);
    assert_eq!(tokens[0]["userId"], "u1");

    // Verifying again reuses the same tokens
    let again: Value = h
        .server
        .get("/api/verify-session?session_id=cs_paid")
        .await
        .json();
    assert_eq!(again["downloadTokens"], body["downloadTokens"]);
    assert_eq!(h.notifier.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_verify_unpaid_session_is_rejected() {
    let h = harness(
        MockProcessor::default()
            .with_session(paid_session("cs_unpaid", PaymentStatus::Unpaid))
            .with_session(paid_session("cs_free", PaymentStatus::NoPaymentRequired)),
    );

    for id in ["cs_unpaid", "cs_free"] {
        let response = h
            .server
            .get(&format!("/api/verify-session?session_id={}", id))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }
    assert_eq!(h.notifier.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_verify_missing_or_unknown_session() {
    let h = harness(MockProcessor::default());

    h.server
        .get("/api/verify-session")
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    h.server
        .get("/api/verify-session?session_id=%20")
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    h.server
        .get("/api/verify-session?session_id=cs_missing")
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_webhook_wrong_secret_rejected() {
    let h = harness(MockProcessor::default());
    let body = completed_event_body("evt_1", "cs_hook");

    let response = post_webhook(&h.server, &body, "whsec_wrong").await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert!(response.text().starts_with("Webhook Error:"));
    assert_eq!(h.notifier.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_webhook_missing_signature_rejected() {
    let h = harness(MockProcessor::default());

    let response = h
        .server
        .post("/api/webhooks/stripe")
        .bytes(Bytes::from(completed_event_body("evt_1", "cs_hook")))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert!(response.text().starts_with("Webhook Error:"));
}

#[tokio::test]
async fn test_webhook_redelivery_fulfils_once() {
    let h = harness(MockProcessor::default());
    let body = completed_event_body("evt_1", "cs_hook");

    for _ in 0..2 {
        let response = post_webhook(&h.server, &body, WEBHOOK_SECRET).await;
        response.assert_status_ok();
        let ack: Value = response.json();
        assert_eq!(ack, json!({"received": true}));
    }

    assert_eq!(h.notifier.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_concurrent_webhook_deliveries_fulfil_once() {
    let h = harness(MockProcessor::default());
    let body = completed_event_body("evt_1", "cs_hook");

    let (first, second) = tokio::join!(
        post_webhook(&h.server, &body, WEBHOOK_SECRET),
        post_webhook(&h.server, &body, WEBHOOK_SECRET),
    );
    first.assert_status_ok();
    second.assert_status_ok();

    assert_eq!(h.notifier.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.state.tokens.for_session("cs_hook").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_verify_racing_webhook_issues_one_token_set() {
    let h = harness(
        MockProcessor::default().with_session(paid_session("cs_paid", PaymentStatus::Paid)),
    );
    let body = completed_event_body_for("evt_1", "cs_paid", "u1", r#"["wf-1","wf-2"]"#);

    let (verified, hook) = tokio::join!(
        h.server.get("/api/verify-session?session_id=cs_paid"),
        post_webhook(&h.server, &body, WEBHOOK_SECRET),
    );
    verified.assert_status_ok();
    hook.assert_status_ok();

    let verified: Value = verified.json();
    let mut returned: Vec<String> = verified["downloadTokens"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["token"].as_str().unwrap().to_string())
        .collect();
    returned.sort();

    let mut stored: Vec<String> = h
        .state
        .tokens
        .for_session("cs_paid")
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.token)
        .collect();
    stored.sort();

    assert_eq!(stored.len(), 2);
    assert_eq!(returned, stored);
    assert_eq!(h.notifier.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_webhook_unhandled_event_acknowledged() {
    let h = harness(MockProcessor::default());
    let body = serde_json::to_vec(&json!({
        "id": "evt_2",
        "type": "customer.created",
        "created": Utc::now().timestamp(),
        "data": {"object": {"id": "cus_1"}}
    }))
    .unwrap();

    post_webhook(&h.server, &body, WEBHOOK_SECRET)
        .await
        .assert_status_ok();
    assert_eq!(h.notifier.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_download_denied_by_default() {
    let h = harness(MockProcessor::default());

    h.server
        .get("/api/download/wf-1")
        .await
        .assert_status(StatusCode::FORBIDDEN);
    h.server
        .get("/api/download/wf-1?userId=u1&token=deadbeef")
        .await
        .assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_download_with_token() {
    let h = harness(
        MockProcessor::default().with_session(paid_session("cs_paid", PaymentStatus::Paid)),
    );

    let verified: Value = h
        .server
        .get("/api/verify-session?session_id=cs_paid")
        .await
        .json();
    let token = verified["downloadTokens"][0]["token"].as_str().unwrap().to_string();
    assert_eq!(verified["downloadTokens"][0]["productId"], "wf-1");

    let response = h
        .server
        .get(&format!("/api/download/wf-1?userId=u1&token={}", token))
        .await;
    response.assert_status_ok();
    assert_eq!(response.text(), r#"{"nodes":[]}"#);
    assert_eq!(
        response.header(header::CONTENT_DISPOSITION),
        "attachment; filename=\"workflow-wf-1.json\""
    );

    // Token is bound to its user and product
    h.server
        .get(&format!("/api/download/wf-1?userId=u2&token={}", token))
        .await
        .assert_status(StatusCode::FORBIDDEN);
    h.server
        .get(&format!("/api/download/wf-2?userId=u1&token={}", token))
        .await
        .assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_download_missing_file() {
    let h = harness(
        MockProcessor::default().with_session(paid_session("cs_paid", PaymentStatus::Paid)),
    );

    let verified: Value = h
        .server
        .get("/api/verify-session?session_id=cs_paid")
        .await
        .json();
    // wf-2 was purchased but has no file on disk
    let token = verified["downloadTokens"][1]["token"].as_str().unwrap().to_string();
    assert!(!h.downloads.path().join("wf-2.json").exists());

    h.server
        .get(&format!("/api/download/wf-2?userId=u1&token={}", token))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_download_rejects_bad_product_id() {
    let h = harness(MockProcessor::default());

    h.server
        .get("/api/download/wf.1?userId=u1&token=abc")
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    h.server
        .get("/api/download/..%2Fsecret?userId=u1&token=abc")
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

fn bearer(sub: &str, secret: &str) -> HeaderValue {
    let claims = json!({"sub": sub, "exp": Utc::now().timestamp() + 3600});
    let token = jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap();
    HeaderValue::from_str(&format!("Bearer {}", token)).unwrap()
}

#[tokio::test]
async fn test_download_with_bearer() {
    let h = harness(MockProcessor::default());
    let body = completed_event_body("evt_1", "cs_hook");
    post_webhook(&h.server, &body, WEBHOOK_SECRET)
        .await
        .assert_status_ok();

    h.server
        .get("/api/download/wf-1")
        .add_header(header::AUTHORIZATION, bearer("u1", JWT_SECRET))
        .await
        .assert_status_ok();

    // Valid caller, nothing purchased
    h.server
        .get("/api/download/wf-1")
        .add_header(header::AUTHORIZATION, bearer("u2", JWT_SECRET))
        .await
        .assert_status(StatusCode::FORBIDDEN);

    h.server
        .get("/api/download/wf-1")
        .add_header(header::AUTHORIZATION, bearer("u1", "forged"))
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_guest_bearer_cannot_open_guest_purchases() {
    let h = harness(MockProcessor::default());
    let body = completed_event_body_for("evt_1", "cs_guest", "guest", r#"["wf-1"]"#);
    post_webhook(&h.server, &body, WEBHOOK_SECRET)
        .await
        .assert_status_ok();

    h.server
        .get("/api/download/wf-1")
        .add_header(header::AUTHORIZATION, bearer("guest", JWT_SECRET))
        .await
        .assert_status(StatusCode::FORBIDDEN);

    // The purchase's own token still works
    let tokens = h.state.tokens.for_session("cs_guest").await.unwrap();
    h.server
        .get(&format!("/api/download/wf-1?userId=guest&token={}", tokens[0].token))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_query_token_wins_over_bad_authorization() {
    let h = harness(
        MockProcessor::default().with_session(paid_session("cs_paid", PaymentStatus::Paid)),
    );
    let verified: Value = h
        .server
        .get("/api/verify-session?session_id=cs_paid")
        .await
        .json();
    let token = verified["downloadTokens"][0]["token"].as_str().unwrap().to_string();
    let url = format!("/api/download/wf-1?userId=u1&token={}", token);

    for authorization in [
        HeaderValue::from_static("Basic dXNlcjpwYXNz"),
        bearer("u1", "forged"),
    ] {
        h.server
            .get(&url)
            .add_header(header::AUTHORIZATION, authorization.clone())
            .await
            .assert_status_ok();

        // Without the query pair the bad header is still refused
        h.server
            .get("/api/download/wf-1")
            .add_header(header::AUTHORIZATION, authorization)
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }
}
