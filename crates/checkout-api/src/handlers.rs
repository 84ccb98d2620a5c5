//! # Request Handlers
//!
//! Axum request handlers for the checkout API.

use crate::auth::BearerUser;
use crate::state::AppState;
use axum::{
    body::{Body, Bytes},
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use checkout_core::{
    CheckoutRequest, CheckoutSessionParams, DownloadCredentials, DownloadToken, PaymentError,
};
use checkout_stripe::DispatchOutcome;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::{error, info, instrument, warn};

// =============================================================================
// Request/Response Types
// =============================================================================

/// Create checkout response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCheckoutResponse {
    /// Session ID (the storefront redirects with it)
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifySessionQuery {
    pub session_id: Option<String>,
}

/// Verified, paid session with its download tokens
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifySessionResponse {
    pub success: bool,
    /// Processor's own session object
    pub session: serde_json::Value,
    pub purchased_items: Vec<String>,
    pub download_tokens: Vec<DownloadToken>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadQuery {
    pub user_id: Option<String>,
    pub token: Option<String>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: u16) -> Self {
        Self {
            error: error.into(),
            code,
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Map a `PaymentError` to its status and JSON body.
///
/// Server errors carry a debug `details` string unless `expose_details` is off.
pub fn payment_error_to_response(err: PaymentError, expose_details: bool) -> ApiError {
    let code = err.status_code();
    let mut response = ErrorResponse::new(err.to_string(), code);

    if !err.is_client_error() {
        error!("Request failed: {}", err);
        if expose_details {
            response = response.with_details(format!("{:?}", err));
        }
    }

    (
        StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(response),
    )
}

fn api_error(state: &AppState, err: PaymentError) -> ApiError {
    payment_error_to_response(err, !state.config.is_production())
}

fn webhook_error(message: impl std::fmt::Display) -> Response {
    (StatusCode::BAD_REQUEST, format!("Webhook Error: {}", message)).into_response()
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    // The processor is built at startup, so a running server is connected
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        "stripe": "connected"
    }))
}

/// Create a hosted checkout session for the cart
#[instrument(skip(state, payload))]
pub async fn create_checkout_session(
    State(state): State<AppState>,
    payload: Result<Json<CheckoutRequest>, JsonRejection>,
) -> Result<Json<CreateCheckoutResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| {
        api_error(&state, PaymentError::InvalidRequest(e.body_text()))
    })?;

    let params =
        CheckoutSessionParams::from_request(&request, &state.urls, &state.settings, Utc::now())
            .map_err(|e| api_error(&state, e))?;

    info!(
        items = request.items.len(),
        user_id = %request.user_id(),
        "Creating checkout session"
    );

    let session = state
        .processor
        .create_checkout_session(&params)
        .await
        .map_err(|e| api_error(&state, e))?;

    info!(session_id = %session.session_id, "Checkout session created");

    Ok(Json(CreateCheckoutResponse {
        session_id: session.session_id,
    }))
}

/// Confirm payment for the success page and hand back download tokens
#[instrument(skip(state, query))]
pub async fn verify_session(
    State(state): State<AppState>,
    Query(query): Query<VerifySessionQuery>,
) -> Result<Json<VerifySessionResponse>, ApiError> {
    let session_id = query
        .session_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            api_error(
                &state,
                PaymentError::InvalidRequest("session_id is required".to_string()),
            )
        })?;

    let session = state
        .processor
        .retrieve_session(session_id)
        .await
        .map_err(|e| api_error(&state, e))?;

    session.ensure_paid().map_err(|e| {
        info!(session_id, payment_status = %session.payment_status, "Session not paid");
        api_error(&state, e)
    })?;

    let purchased_items = session
        .purchased_items()
        .map_err(|e| api_error(&state, e))?;

    // Same path as the webhook; whichever arrives second reuses the tokens
    let outcome = state
        .fulfillment
        .fulfill(&session)
        .await
        .map_err(|e| api_error(&state, e))?;

    Ok(Json(VerifySessionResponse {
        success: true,
        session: session.raw,
        purchased_items,
        download_tokens: outcome.tokens,
    }))
}

/// Stripe webhook handler
///
/// Needs the raw body: the signature covers the exact bytes Stripe sent.
#[instrument(skip(state, headers, body))]
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(signature) = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
    else {
        warn!("Webhook without stripe-signature header");
        return webhook_error("Missing stripe-signature header");
    };

    let event = match state.processor.verify_webhook(&body, signature).await {
        Ok(event) => event,
        Err(e) => {
            warn!("Webhook verification failed: {}", e);
            return webhook_error(e);
        }
    };

    info!(
        event_id = %event.event_id,
        event_type = %event.event_type,
        "Webhook received"
    );

    // Verified events are always acknowledged, or Stripe would keep retrying
    match state.webhooks.dispatch(&event).await {
        Ok(DispatchOutcome::Handled) => {}
        Ok(DispatchOutcome::Duplicate) => {
            info!(event_id = %event.event_id, "Duplicate webhook delivery ignored");
        }
        Err(e) => {
            error!(event_id = %event.event_id, "Webhook handler error: {}", e);
        }
    }

    Json(serde_json::json!({ "received": true })).into_response()
}

/// Stream a purchased workflow file
#[instrument(skip(state, query, bearer))]
pub async fn download(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
    Query(query): Query<DownloadQuery>,
    BearerUser(bearer): BearerUser,
) -> Result<Response, ApiError> {
    // A complete query pair wins; a bad bearer only matters when it is all we have
    let credentials = match DownloadCredentials::from_query(query.user_id, query.token) {
        DownloadCredentials::Anonymous => match bearer {
            Some(Ok(user_id)) => DownloadCredentials::Authenticated { user_id },
            Some(Err(e)) => return Err(api_error(&state, e)),
            None => DownloadCredentials::Anonymous,
        },
        from_query => from_query,
    };

    state
        .gate
        .check(&product_id, &credentials, Utc::now())
        .await
        .map_err(|e| {
            if matches!(e, PaymentError::AccessDenied { .. }) {
                warn!(product_id = %product_id, "Download denied");
            }
            api_error(&state, e)
        })?;

    let path = state
        .config
        .downloads_dir
        .join(format!("{}.json", product_id));

    let file = tokio::fs::File::open(&path).await.map_err(|e| {
        let err = if e.kind() == std::io::ErrorKind::NotFound {
            PaymentError::DownloadNotFound {
                product_id: product_id.clone(),
            }
        } else {
            PaymentError::Storage(format!("failed to open {}: {}", path.display(), e))
        };
        api_error(&state, err)
    })?;

    info!(product_id = %product_id, "Serving download");

    let headers = [
        (header::CONTENT_TYPE, "application/json".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"workflow-{}.json\"", product_id),
        ),
    ];

    Ok((headers, Body::from_stream(ReaderStream::new(file))).into_response())
}
