//! # Stripe Configuration
//!
//! Configuration management for Stripe integration.
//! All secrets are loaded from environment variables, never from source.

use checkout_core::PaymentError;
use std::env;
use std::time::Duration;

const DEFAULT_API_BASE_URL: &str = "https://api.stripe.com";
const DEFAULT_API_VERSION: &str = "2023-10-16";

/// Upper bound on `max_retries`, wherever it comes from
pub const MAX_RETRIES: u32 = 5;

/// Longest wait between two attempts
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Stripe API configuration
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Secret API key (sk_test_... or sk_live_...)
    pub secret_key: String,

    /// Webhook signing secret (whsec_...)
    pub webhook_secret: String,

    /// API base URL (for testing/mocking)
    pub api_base_url: String,

    /// API version
    pub api_version: String,

    /// Per-request timeout
    pub timeout: Duration,

    /// Extra attempts for transient failures
    pub max_retries: u32,

    /// First retry delay, doubled per attempt
    pub retry_backoff: Duration,

    /// Accepted age of a webhook signature timestamp
    pub webhook_tolerance_secs: i64,
}

impl StripeConfig {
    /// Load configuration from environment variables.
    ///
    /// Required env vars:
    /// - `STRIPE_SECRET_KEY`
    /// - `STRIPE_WEBHOOK_SECRET`
    ///
    /// Optional:
    /// - `STRIPE_API_BASE_URL`
    /// - `STRIPE_MAX_RETRIES` (default 2, at most 5)
    pub fn from_env() -> Result<Self, PaymentError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let secret_key = env::var("STRIPE_SECRET_KEY").map_err(|_| {
            PaymentError::Configuration("STRIPE_SECRET_KEY not set".to_string())
        })?;

        let webhook_secret = env::var("STRIPE_WEBHOOK_SECRET").map_err(|_| {
            PaymentError::Configuration("STRIPE_WEBHOOK_SECRET not set".to_string())
        })?;

        let mut config = Self::new(secret_key, webhook_secret);
        config.validate()?;

        if let Ok(url) = env::var("STRIPE_API_BASE_URL") {
            config = config.with_api_base_url(url);
        }

        if let Ok(retries) = env::var("STRIPE_MAX_RETRIES") {
            config.max_retries = parse_max_retries(&retries)?;
        }

        Ok(config)
    }

    /// Create config with explicit values (for testing)
    pub fn new(secret_key: impl Into<String>, webhook_secret: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            webhook_secret: webhook_secret.into(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 2,
            retry_backoff: Duration::from_millis(250),
            webhook_tolerance_secs: 300,
        }
    }

    /// Validate key formats
    pub fn validate(&self) -> Result<(), PaymentError> {
        if !self.secret_key.starts_with("sk_test_") && !self.secret_key.starts_with("sk_live_") {
            return Err(PaymentError::Configuration(
                "STRIPE_SECRET_KEY must start with sk_test_ or sk_live_".to_string(),
            ));
        }

        if !self.webhook_secret.starts_with("whsec_") {
            return Err(PaymentError::Configuration(
                "STRIPE_WEBHOOK_SECRET must start with whsec_".to_string(),
            ));
        }

        Ok(())
    }

    /// Check if using live keys
    pub fn is_live_mode(&self) -> bool {
        self.secret_key.starts_with("sk_live_")
    }

    /// Get authorization header value
    pub fn auth_header(&self) -> String {
        format!("Bearer {}", self.secret_key)
    }

    /// Builder: set custom API base URL (for testing)
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Builder: retry policy
    pub fn with_retries(mut self, max_retries: u32, backoff: Duration) -> Self {
        self.max_retries = max_retries.min(MAX_RETRIES);
        self.retry_backoff = backoff;
        self
    }

    /// Wait before retry number `attempt` (0-based): doubled each time, capped
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        self.retry_backoff
            .checked_mul(2u32.saturating_pow(attempt))
            .unwrap_or(MAX_RETRY_DELAY)
            .min(MAX_RETRY_DELAY)
    }
}

fn parse_max_retries(value: &str) -> Result<u32, PaymentError> {
    let retries: u32 = value.trim().parse().map_err(|_| {
        PaymentError::Configuration(format!(
            "STRIPE_MAX_RETRIES must be a non-negative integer, got '{}'",
            value
        ))
    })?;

    if retries > MAX_RETRIES {
        tracing::warn!("STRIPE_MAX_RETRIES={} exceeds {}, clamping", retries, MAX_RETRIES);
    }
    Ok(retries.min(MAX_RETRIES))
}
