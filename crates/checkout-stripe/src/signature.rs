//! # Webhook Signature Verification
//!
//! Stripe signs `"{timestamp}.{raw body}"` with HMAC-SHA256 and sends
//! `Stripe-Signature: t=<unix>,v1=<hex>[,v1=<hex>...]`. An event is only
//! parsed after one `v1` signature matches and the timestamp is fresh.

use checkout_core::{PaymentError, PaymentResult, WebhookEvent, WebhookEventType};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

struct SignatureHeader {
    timestamp: i64,
    signatures: Vec<String>,
}

fn parse_signature_header(header: &str) -> PaymentResult<SignatureHeader> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => signatures.push(value.to_string()),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        PaymentError::WebhookVerificationFailed(
            "Unable to extract timestamp and signatures from header".to_string(),
        )
    })?;

    if signatures.is_empty() {
        return Err(PaymentError::WebhookVerificationFailed(
            "No signatures found with expected scheme".to_string(),
        ));
    }

    Ok(SignatureHeader {
        timestamp,
        signatures,
    })
}

fn compute_signature(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Build a valid `Stripe-Signature` header for `payload`.
///
/// Used to generate test deliveries.
pub fn signature_header(payload: &[u8], secret: &str, timestamp: i64) -> String {
    format!("t={},v1={}", timestamp, compute_signature(secret, timestamp, payload))
}

/// Check the signature header against `payload`
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_secs: i64,
    now: DateTime<Utc>,
) -> PaymentResult<()> {
    let parsed = parse_signature_header(header)?;

    let expected = compute_signature(secret, parsed.timestamp, payload);
    let matched = parsed
        .signatures
        .iter()
        .any(|sig| bool::from(sig.as_bytes().ct_eq(expected.as_bytes())));

    if !matched {
        return Err(PaymentError::WebhookVerificationFailed(
            "No signatures found matching the expected signature for payload".to_string(),
        ));
    }

    if (now.timestamp() - parsed.timestamp).abs() > tolerance_secs {
        return Err(PaymentError::WebhookVerificationFailed(
            "Timestamp outside the tolerance zone".to_string(),
        ));
    }

    Ok(())
}

#[derive(Debug, Deserialize)]
struct StripeWebhookEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    created: i64,
    #[serde(default)]
    livemode: bool,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: serde_json::Value,
}

/// Verify the signature, then parse the event.
///
/// Nothing in `payload` is looked at before the signature checks out.
pub fn construct_event(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_secs: i64,
    now: DateTime<Utc>,
) -> PaymentResult<WebhookEvent> {
    verify_signature(payload, header, secret, tolerance_secs, now)?;

    let event: StripeWebhookEvent = serde_json::from_slice(payload).map_err(|e| {
        PaymentError::WebhookParseError(format!("Failed to parse webhook: {}", e))
    })?;

    Ok(WebhookEvent {
        event_id: event.id,
        event_type: WebhookEventType::from_tag(&event.event_type),
        provider: "stripe".to_string(),
        object: event.data.object,
        livemode: event.livemode,
        created_at: DateTime::from_timestamp(event.created, 0).unwrap_or(now),
    })
}
