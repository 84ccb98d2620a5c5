//! # Stripe Checkout Sessions
//!
//! `PaymentProcessor` implementation over the Stripe Checkout Sessions API.
//! Hosted checkout keeps card data off this server entirely.

use crate::config::{StripeConfig, MAX_RETRIES};
use crate::form::{flatten_json, push_list, FormParams};
use crate::signature::construct_event;
use async_trait::async_trait;
use checkout_core::{
    CheckoutSession, CheckoutSessionParams, PaymentError, PaymentProcessor, PaymentResult,
    PaymentStatus, SessionStatus, WebhookEvent,
};
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, error, info, instrument, warn};

const PROVIDER: &str = "stripe";

/// Stripe Checkout processor
///
/// Constructed once at startup and shared behind `Arc<dyn PaymentProcessor>`.
pub struct StripeProcessor {
    config: StripeConfig,
    client: Client,
}

impl StripeProcessor {
    /// Create a new processor; fails only if the TLS backend cannot initialise
    pub fn new(config: StripeConfig) -> PaymentResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PaymentError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Create from environment variables
    pub fn from_env() -> PaymentResult<Self> {
        Self::new(StripeConfig::from_env()?)
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }

    /// Build the form body for `POST /v1/checkout/sessions`
    fn build_form(params: &CheckoutSessionParams) -> FormParams {
        let mut form: FormParams = vec![
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), params.success_url.clone()),
            ("cancel_url".to_string(), params.cancel_url.clone()),
        ];

        push_list("payment_method_types", &params.payment_method_types, &mut form);

        for (i, item) in params.line_items.iter().enumerate() {
            flatten_json(&format!("line_items[{}]", i), item.as_json(), &mut form);
        }

        for (key, value) in &params.metadata {
            form.push((format!("metadata[{}]", key), value.clone()));
        }

        if let Some(ref email) = params.customer_email {
            form.push(("customer_email".to_string(), email.clone()));
        }

        form.push((
            "automatic_tax[enabled]".to_string(),
            params.automatic_tax.to_string(),
        ));
        form.push((
            "invoice_creation[enabled]".to_string(),
            params.invoice_creation.to_string(),
        ));

        push_list(
            "shipping_address_collection[allowed_countries]",
            &params.allowed_countries,
            &mut form,
        );

        form
    }

    /// Send a request, retrying transient failures with exponential backoff
    async fn execute<F>(&self, build: F, context: &RequestContext<'_>) -> PaymentResult<serde_json::Value>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt: u32 = 0;
        loop {
            match self.send_once(build(), context).await {
                Err(e) if e.is_retryable() && attempt < self.config.max_retries.min(MAX_RETRIES) => {
                    let delay = self.config.retry_delay(attempt);
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying Stripe request"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn send_once(
        &self,
        request: RequestBuilder,
        context: &RequestContext<'_>,
    ) -> PaymentResult<serde_json::Value> {
        let response = request
            .header("Authorization", self.config.auth_header())
            .header("Stripe-Version", &self.config.api_version)
            .send()
            .await
            .map_err(|e| PaymentError::NetworkError(e.to_string()))?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let body = response
            .text()
            .await
            .map_err(|e| PaymentError::NetworkError(e.to_string()))?;

        if status.is_success() {
            return serde_json::from_str(&body).map_err(|e| {
                PaymentError::Serialization(format!("Failed to parse Stripe response: {}", e))
            });
        }

        error!("Stripe API error: status={}, body={}", status, body);

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(PaymentError::RateLimited {
                provider: PROVIDER.to_string(),
                retry_after_secs: retry_after.unwrap_or(1),
            });
        }

        if status.is_server_error() {
            return Err(PaymentError::ProviderUnavailable {
                provider: PROVIDER.to_string(),
                status: status.as_u16(),
            });
        }

        let Ok(error_response) = serde_json::from_str::<StripeErrorResponse>(&body) else {
            return Err(PaymentError::ProviderError {
                provider: PROVIDER.to_string(),
                message: format!("HTTP {}: {}", status, body),
            });
        };

        let api_error = error_response.error;
        if api_error.error_type.as_deref() == Some("idempotency_error") {
            if let Some(key) = context.idempotency_key {
                return Err(PaymentError::IdempotencyConflict {
                    key: key.to_string(),
                });
            }
        }

        if api_error.code.as_deref() == Some("resource_missing") || status == StatusCode::NOT_FOUND {
            if let Some(session_id) = context.session_id {
                return Err(PaymentError::SessionNotFound {
                    session_id: session_id.to_string(),
                });
            }
        }

        Err(PaymentError::ProviderError {
            provider: PROVIDER.to_string(),
            message: api_error
                .message
                .unwrap_or_else(|| format!("HTTP {}", status)),
        })
    }
}

/// Identifiers used to classify Stripe error responses
struct RequestContext<'a> {
    idempotency_key: Option<&'a str>,
    session_id: Option<&'a str>,
}

#[async_trait]
impl PaymentProcessor for StripeProcessor {
    #[instrument(skip(self, params), fields(items = params.line_items.len()))]
    async fn create_checkout_session(
        &self,
        params: &CheckoutSessionParams,
    ) -> PaymentResult<CheckoutSession> {
        if params.line_items.is_empty() {
            return Err(PaymentError::InvalidRequest("Cart has no items".to_string()));
        }

        let form = Self::build_form(params);
        debug!("Creating Stripe checkout session: {} form fields", form.len());

        let url = format!("{}/v1/checkout/sessions", self.config.api_base_url);
        let context = RequestContext {
            idempotency_key: Some(&params.idempotency_key),
            session_id: None,
        };

        let body = self
            .execute(
                || {
                    self.client
                        .post(&url)
                        .header("Idempotency-Key", &params.idempotency_key)
                        .form(&form)
                },
                &context,
            )
            .await?;

        let session = session_from_object(&body)?;
        info!(
            "Created Stripe checkout session: id={}, url={:?}",
            session.session_id, session.checkout_url
        );
        Ok(session)
    }

    #[instrument(skip(self))]
    async fn retrieve_session(&self, session_id: &str) -> PaymentResult<CheckoutSession> {
        if session_id.trim().is_empty() {
            return Err(PaymentError::InvalidRequest(
                "session_id is required".to_string(),
            ));
        }

        // The id is interpolated into the request path
        if !session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(PaymentError::InvalidRequest(format!(
                "invalid session_id: {:?}",
                session_id
            )));
        }

        let url = format!(
            "{}/v1/checkout/sessions/{}",
            self.config.api_base_url, session_id
        );
        let context = RequestContext {
            idempotency_key: None,
            session_id: Some(session_id),
        };

        let body = self.execute(|| self.client.get(&url), &context).await?;
        session_from_object(&body)
    }

    #[instrument(skip(self, payload, signature))]
    async fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> PaymentResult<WebhookEvent> {
        let event = construct_event(
            payload,
            signature,
            &self.config.webhook_secret,
            self.config.webhook_tolerance_secs,
            Utc::now(),
        )?;

        debug!("Verified Stripe webhook: type={}", event.event_type);
        Ok(event)
    }

    fn provider_name(&self) -> &'static str {
        PROVIDER
    }
}

/// Read a Stripe Checkout Session object (API response or `data.object`)
pub fn session_from_object(object: &serde_json::Value) -> PaymentResult<CheckoutSession> {
    let obj = object.as_object().ok_or_else(|| {
        PaymentError::Serialization("Checkout session is not an object".to_string())
    })?;

    let str_field = |name: &str| obj.get(name).and_then(|v| v.as_str()).map(String::from);

    let session_id = str_field("id")
        .ok_or_else(|| PaymentError::Serialization("Missing session id".to_string()))?;

    let status = str_field("status")
        .map(|s| SessionStatus::parse(&s))
        .unwrap_or_default();

    let payment_status = str_field("payment_status")
        .map(|s| PaymentStatus::parse(&s))
        .unwrap_or_default();

    let customer_email = obj
        .get("customer_details")
        .and_then(|cd| cd.get("email"))
        .and_then(|v| v.as_str())
        .map(String::from)
        .or_else(|| str_field("customer_email"));

    let metadata: HashMap<String, String> = obj
        .get("metadata")
        .and_then(|m| m.as_object())
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default();

    let expires_at = obj
        .get("expires_at")
        .and_then(|v| v.as_i64())
        .and_then(|ts| DateTime::from_timestamp(ts, 0));

    Ok(CheckoutSession {
        session_id,
        status,
        payment_status,
        checkout_url: str_field("url"),
        amount_total: obj.get("amount_total").and_then(|v| v.as_i64()),
        currency: str_field("currency"),
        customer_email,
        metadata,
        expires_at,
        raw: object.clone(),
    })
}

// =============================================================================
// Stripe API Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct StripeErrorResponse {
    error: StripeError,
}

#[derive(Debug, Deserialize)]
struct StripeError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default, rename = "type")]
    error_type: Option<String>,
    #[serde(default)]
    code: Option<String>,
}
