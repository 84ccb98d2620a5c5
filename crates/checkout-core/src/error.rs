//! # Payment Error Types
//!
//! Typed error handling for the checkout backend.
//! All checkout, webhook and download operations return `Result<T, PaymentError>`.

use thiserror::Error;

/// Core error type for all checkout operations
#[derive(Debug, Error)]
pub enum PaymentError {
    /// Configuration errors (missing keys, invalid config)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Invalid request data (empty cart, missing session id, bad product id)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Session lookup returned nothing from the processor
    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    /// Session exists but has not been paid
    #[error("Payment not completed for session {session_id} (status: {payment_status})")]
    PaymentIncomplete {
        session_id: String,
        payment_status: String,
    },

    /// Payment provider API error
    #[error("Provider error [{provider}]: {message}")]
    ProviderError { provider: String, message: String },

    /// Provider answered with a 5xx
    #[error("Provider unavailable [{provider}]: HTTP {status}")]
    ProviderUnavailable { provider: String, status: u16 },

    /// Network/HTTP error communicating with provider
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Webhook signature verification failed
    #[error("Webhook verification failed: {0}")]
    WebhookVerificationFailed(String),

    /// Webhook payload parsing error
    #[error("Webhook parse error: {0}")]
    WebhookParseError(String),

    /// Session metadata could not be decoded
    #[error("Invalid session metadata: {0}")]
    InvalidMetadata(String),

    /// Caller could not be authenticated (bad bearer credential)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Caller is authenticated (or anonymous) but has no access
    #[error("Access denied to product {product_id}")]
    AccessDenied { product_id: String },

    /// Purchased file is missing from download storage
    #[error("Download not found: {product_id}")]
    DownloadNotFound { product_id: String },

    /// Idempotency conflict (duplicate request with different params)
    #[error("Idempotency conflict: request with key {key} already exists with different parameters")]
    IdempotencyConflict { key: String },

    /// Rate limited by provider
    #[error("Rate limited by {provider}, retry after {retry_after_secs} seconds")]
    RateLimited {
        provider: String,
        retry_after_secs: u64,
    },

    /// Purchase/token store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Internal error (should not happen)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PaymentError {
    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentError::NetworkError(_)
                | PaymentError::ProviderUnavailable { .. }
                | PaymentError::RateLimited { .. }
        )
    }

    /// Returns the HTTP status code appropriate for this error
    pub fn status_code(&self) -> u16 {
        match self {
            PaymentError::Configuration(_) => 500,
            PaymentError::InvalidRequest(_) => 400,
            PaymentError::SessionNotFound { .. } => 400,
            PaymentError::PaymentIncomplete { .. } => 400,
            PaymentError::ProviderError { .. } => 500,
            PaymentError::ProviderUnavailable { .. } => 500,
            PaymentError::NetworkError(_) => 500,
            PaymentError::WebhookVerificationFailed(_) => 400,
            PaymentError::WebhookParseError(_) => 400,
            PaymentError::InvalidMetadata(_) => 500,
            PaymentError::Unauthorized(_) => 401,
            PaymentError::AccessDenied { .. } => 403,
            PaymentError::DownloadNotFound { .. } => 404,
            PaymentError::IdempotencyConflict { .. } => 409,
            PaymentError::RateLimited { .. } => 500,
            PaymentError::Storage(_) => 500,
            PaymentError::Internal(_) => 500,
            PaymentError::Serialization(_) => 500,
        }
    }

    /// True for errors caused by the caller rather than the server
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}

impl From<serde_json::Error> for PaymentError {
    fn from(err: serde_json::Error) -> Self {
        PaymentError::Serialization(err.to_string())
    }
}

/// Result type alias for payment operations
pub type PaymentResult<T> = Result<T, PaymentError>;
