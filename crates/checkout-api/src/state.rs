//! # Application State
//!
//! Shared state for the Axum application.
//! Contains the payment processor, stores, fulfilment and configuration.

use checkout_core::{
    CheckoutSettings, CheckoutUrls, DownloadGate, InMemoryProcessedEventStore,
    InMemoryPurchaseStore, InMemoryTokenStore, LoggingNotifier, PurchaseFulfillment,
    PurchaseNotifier, PurchaseStore, SharedPaymentProcessor, TokenStore,
};
use checkout_stripe::{
    FulfillmentWebhookHandler, IdempotentDispatcher, StripeConfig, StripeProcessor,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Storefront origin, used for redirects and CORS
    pub frontend_url: String,
    /// Environment (development, staging, production)
    pub environment: String,
    /// Directory holding `{product_id}.json` downloads
    pub downloads_dir: PathBuf,
    /// HS256 secret for bearer tokens; bearer auth is off without it
    pub jwt_secret: Option<String>,
}

impl AppConfig {
    /// Load from environment variables (and `.env` if present)
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup, falling back to defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(4242),
            frontend_url: lookup("FRONTEND_URL")
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
            environment: lookup("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
            downloads_dir: lookup("DOWNLOADS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("workflows")),
            jwt_secret: lookup("JWT_SECRET").filter(|s| !s.is_empty()),
        }
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid socket address {}:{}: {}", self.host, self.port, e))
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Hosted-checkout provider
    pub processor: SharedPaymentProcessor,
    /// Success/cancel redirect targets
    pub urls: CheckoutUrls,
    /// Session options (countries, tax, token lifetime)
    pub settings: Arc<CheckoutSettings>,
    pub tokens: Arc<dyn TokenStore>,
    pub fulfillment: Arc<PurchaseFulfillment>,
    pub gate: Arc<DownloadGate>,
    /// Verified webhook events go through here
    pub webhooks: Arc<IdempotentDispatcher>,
    /// Application config
    pub config: AppConfig,
}

impl AppState {
    /// Create a new AppState backed by Stripe
    pub fn new() -> anyhow::Result<Self> {
        let config = AppConfig::from_env();
        let settings = load_checkout_settings()?;

        let processor = StripeProcessor::from_env()
            .map_err(|e| anyhow::anyhow!("Failed to initialize Stripe: {}", e))?;
        if let Some(warning) = key_mode_mismatch(&config, processor.config()) {
            tracing::warn!("{}", warning);
        }

        Ok(Self::assemble(
            config,
            settings,
            Arc::new(processor),
            Arc::new(LoggingNotifier),
        ))
    }

    /// Wire in-memory stores, fulfilment and webhook dispatch around a processor
    pub fn assemble(
        config: AppConfig,
        settings: CheckoutSettings,
        processor: SharedPaymentProcessor,
        notifier: Arc<dyn PurchaseNotifier>,
    ) -> Self {
        let purchases: Arc<dyn PurchaseStore> = Arc::new(InMemoryPurchaseStore::new());
        let tokens: Arc<dyn TokenStore> = Arc::new(InMemoryTokenStore::new());

        let fulfillment = Arc::new(PurchaseFulfillment::new(
            purchases.clone(),
            tokens.clone(),
            notifier,
            settings.token_ttl(),
        ));
        let gate = Arc::new(DownloadGate::new(purchases.clone(), tokens.clone()));
        let webhooks = Arc::new(IdempotentDispatcher::new(
            Arc::new(FulfillmentWebhookHandler::new(fulfillment.clone())),
            Arc::new(InMemoryProcessedEventStore::new()),
        ));

        Self {
            processor,
            urls: CheckoutUrls::new(&config.frontend_url),
            settings: Arc::new(settings),
            tokens,
            fulfillment,
            gate,
            webhooks,
            config,
        }
    }
}

/// Live Stripe keys belong to production and nowhere else
pub fn key_mode_mismatch(config: &AppConfig, stripe: &StripeConfig) -> Option<&'static str> {
    match (config.is_production(), stripe.is_live_mode()) {
        (false, true) => Some("Live Stripe key outside production: real cards will be charged"),
        (true, false) => Some("Production environment is running on a Stripe test key"),
        _ => None,
    }
}

/// Load checkout settings from config file
fn load_checkout_settings() -> anyhow::Result<CheckoutSettings> {
    let config_paths = [
        "config/checkout.toml",
        "../config/checkout.toml",
        "../../config/checkout.toml",
    ];

    for path in config_paths {
        if let Ok(content) = std::fs::read_to_string(path) {
            let settings = CheckoutSettings::from_toml_str(&content)
                .map_err(|e| anyhow::anyhow!("Failed to load {}: {}", path, e))?;
            tracing::info!(
                "Loaded checkout settings from {} ({} shipping countries)",
                path,
                settings.allowed_countries.len()
            );
            return Ok(settings);
        }
    }

    tracing::warn!("No checkout settings found, using defaults");
    Ok(CheckoutSettings::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_app_config_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 4242);
        assert_eq!(config.frontend_url, "http://localhost:3000");
        assert_eq!(config.downloads_dir, PathBuf::from("workflows"));
        assert!(config.jwt_secret.is_none());
        assert!(!config.is_production());
    }

    #[test]
    fn test_app_config_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("PORT", "8081"),
            ("FRONTEND_URL", "https://shop.example.com"),
            ("ENVIRONMENT", "production"),
            ("JWT_SECRET", ""),
        ]
        .into_iter()
        .collect();

        let config = AppConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.port, 8081);
        assert_eq!(config.frontend_url, "https://shop.example.com");
        assert!(config.is_production());
        // empty secret disables bearer auth
        assert!(config.jwt_secret.is_none());
    }

    #[test]
    fn test_unparseable_port_falls_back() {
        let config = AppConfig::from_lookup(|k| (k == "PORT").then(|| "http".to_string()));
        assert_eq!(config.port, 4242);
    }

    #[test]
    fn test_key_mode_mismatch() {
        let dev = AppConfig::default();
        let prod = AppConfig {
            environment: "production".to_string(),
            ..AppConfig::default()
        };
        let test_key = StripeConfig::new("sk_test_abc", "whsec_secret");
        let live_key = StripeConfig::new("sk_live_abc", "whsec_secret");

        assert!(key_mode_mismatch(&dev, &test_key).is_none());
        assert!(key_mode_mismatch(&prod, &live_key).is_none());
        assert!(key_mode_mismatch(&dev, &live_key).is_some());
        assert!(key_mode_mismatch(&prod, &test_key).is_some());
    }

    #[test]
    fn test_socket_addr() {
        let config = AppConfig {
            host: "127.0.0.1".to_string(),
            port: 3000,
            ..AppConfig::default()
        };
        assert_eq!(config.socket_addr().unwrap().to_string(), "127.0.0.1:3000");

        let bad = AppConfig {
            host: "not a host".to_string(),
            ..AppConfig::default()
        };
        assert!(bad.socket_addr().is_err());
    }
}
