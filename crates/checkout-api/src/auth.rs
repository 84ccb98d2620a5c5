//! Bearer authentication for downloads.
//!
//! `Authorization: Bearer <jwt>` is an HS256 token signed with `JWT_SECRET`
//! whose `sub` claim is the user id. Without a configured secret the header
//! is ignored and callers fall back to download tokens.

use crate::state::AppState;
use axum::extract::FromRequestParts;
use axum::http::{header::AUTHORIZATION, request::Parts};
use checkout_core::{PaymentError, PaymentResult};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

/// Outcome of the `Authorization` header: `None` when no bearer was sent.
///
/// A bad header is carried as an error rather than rejected, so the handler
/// can still accept other credentials on the same request.
pub struct BearerUser(pub Option<PaymentResult<String>>);

impl FromRequestParts<AppState> for BearerUser {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(header) = parts.headers.get(AUTHORIZATION) else {
            return Ok(BearerUser(None));
        };

        let Some(secret) = state.config.jwt_secret.as_deref() else {
            debug!("Ignoring Authorization header, bearer auth is not configured");
            return Ok(BearerUser(None));
        };

        Ok(BearerUser(Some(bearer_subject(header.to_str().ok(), secret))))
    }
}

/// User id from a raw `Authorization` value
fn bearer_subject(header: Option<&str>, secret: &str) -> PaymentResult<String> {
    let header = header.ok_or_else(|| {
        PaymentError::Unauthorized("Malformed authorization header".to_string())
    })?;

    let token = header.strip_prefix("Bearer ").ok_or_else(|| {
        PaymentError::Unauthorized("Authorization header must start with 'Bearer '".to_string())
    })?;

    verify_bearer(token, secret)
}

/// Validate signature and expiry, returning the `sub` claim
pub fn verify_bearer(token: &str, secret: &str) -> PaymentResult<String> {
    let validation = Validation::new(Algorithm::HS256);
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| PaymentError::Unauthorized(e.to_string()))?;

    if data.claims.sub.is_empty() {
        return Err(PaymentError::Unauthorized("Token has no subject".to_string()));
    }

    Ok(data.claims.sub)
}
