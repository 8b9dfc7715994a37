//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Optional
//! - `STOREFRONT_API_URL` - Base URL of the order/catalog service (default: `http://localhost:8000/api`)
//! - `STOREFRONT_API_TOKEN` - Bearer token sent with every API request
//! - `STOREFRONT_TAX_RATE` - Tax rate applied to the subtotal (default: 0.21)
//! - `STOREFRONT_RETURN_HOST` - Bind address of the loopback return listener (default: 127.0.0.1)
//! - `STOREFRONT_RETURN_PORT` - Port of the loopback return listener (default: 8787)
//! - `STOREFRONT_PAYMENT_TIMEOUT_SECS` - How long to wait for a payment return (default: 900, max: 86400)
//! - `STOREFRONT_REQUEST_TIMEOUT_SECS` - HTTP request timeout (default: 30, max: 86400)
//! - `SENTRY_DSN` - Sentry error tracking DSN

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use rust_decimal::Decimal;
use secrecy::SecretString;
use thiserror::Error;

/// Default tax rate (21%).
pub const DEFAULT_TAX_RATE: Decimal = Decimal::from_parts(21, 0, 0, false, 2);

const DEFAULT_API_URL: &str = "http://localhost:8000/api";

/// Upper bound for every `*_TIMEOUT_SECS` variable (24 hours).
pub const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Storefront engine configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// Order/catalog service configuration
    pub api: ApiConfig,
    /// Tax rate applied to the cart subtotal
    pub tax_rate: Decimal,
    /// IP address the loopback return listener binds to
    pub return_host: IpAddr,
    /// Port of the loopback return listener
    pub return_port: u16,
    /// How long checkout waits in `AwaitingExternalPayment`
    pub payment_timeout: Duration,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
}

/// Order/catalog service configuration.
///
/// Implements `Debug` manually to redact the token.
#[derive(Clone)]
pub struct ApiConfig {
    /// Base URL without a trailing slash (e.g., `https://shop.example/api`)
    pub base_url: String,
    /// Optional bearer token
    pub token: Option<SecretString>,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl ApiConfig {
    /// Configuration pointing at `base_url` with no token and the default timeout.
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: normalize_base_url(base_url),
            token: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set to an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a value cannot be parsed or is out of range.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let base_url = normalize_base_url(&get("STOREFRONT_API_URL", DEFAULT_API_URL));
        url::Url::parse(&base_url).map_err(|e| {
            ConfigError::InvalidEnvVar("STOREFRONT_API_URL".to_string(), e.to_string())
        })?;

        let token = lookup("STOREFRONT_API_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .map(SecretString::from);

        let request_timeout = parse_secs(&get("STOREFRONT_REQUEST_TIMEOUT_SECS", "30"), "STOREFRONT_REQUEST_TIMEOUT_SECS")?;

        let tax_rate = get("STOREFRONT_TAX_RATE", "0.21")
            .trim()
            .parse::<Decimal>()
            .map_err(|e| ConfigError::InvalidEnvVar("STOREFRONT_TAX_RATE".to_string(), e.to_string()))?;
        if tax_rate.is_sign_negative() || tax_rate > Decimal::ONE {
            return Err(ConfigError::InvalidEnvVar(
                "STOREFRONT_TAX_RATE".to_string(),
                format!("must be between 0 and 1 (got {tax_rate})"),
            ));
        }

        let return_host = get("STOREFRONT_RETURN_HOST", "127.0.0.1")
            .parse::<IpAddr>()
            .map_err(|e| {
                ConfigError::InvalidEnvVar("STOREFRONT_RETURN_HOST".to_string(), e.to_string())
            })?;
        let return_port = get("STOREFRONT_RETURN_PORT", "8787")
            .parse::<u16>()
            .map_err(|e| {
                ConfigError::InvalidEnvVar("STOREFRONT_RETURN_PORT".to_string(), e.to_string())
            })?;

        let payment_timeout = parse_secs(&get("STOREFRONT_PAYMENT_TIMEOUT_SECS", "900"), "STOREFRONT_PAYMENT_TIMEOUT_SECS")?;

        Ok(Self {
            api: ApiConfig {
                base_url,
                token,
                request_timeout,
            },
            tax_rate,
            return_host,
            return_port,
            payment_timeout,
            sentry_dsn: lookup("SENTRY_DSN").filter(|dsn| !dsn.is_empty()),
        })
    }

    /// Returns the socket address for the loopback return listener.
    #[must_use]
    pub const fn return_addr(&self) -> SocketAddr {
        SocketAddr::new(self.return_host, self.return_port)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Strip trailing slashes so paths can be appended as `{base}/products/`.
fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

/// Parse a number of seconds in `1..=MAX_TIMEOUT_SECS`.
fn parse_secs(value: &str, var_name: &str) -> Result<Duration, ConfigError> {
    let secs = value
        .trim()
        .parse::<u64>()
        .map_err(|e| ConfigError::InvalidEnvVar(var_name.to_string(), e.to_string()))?;
    if secs == 0 {
        return Err(ConfigError::InvalidEnvVar(
            var_name.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    if secs > MAX_TIMEOUT_SECS {
        return Err(ConfigError::InvalidEnvVar(
            var_name.to_string(),
            format!("must be at most {MAX_TIMEOUT_SECS}"),
        ));
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<StorefrontConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        StorefrontConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.api.base_url, "http://localhost:8000/api");
        assert!(config.api.token.is_none());
        assert_eq!(config.tax_rate, Decimal::new(21, 2));
        assert_eq!(config.return_addr().to_string(), "127.0.0.1:8787");
        assert_eq!(config.payment_timeout, Duration::from_secs(900));
        assert_eq!(config.api.request_timeout, Duration::from_secs(30));
        assert!(config.sentry_dsn.is_none());
    }

    #[test]
    fn test_default_tax_rate_constant() {
        assert_eq!(DEFAULT_TAX_RATE, Decimal::new(21, 2));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let config = load(&[("STOREFRONT_API_URL", "https://shop.bioapp.mx/api/")]).unwrap();
        assert_eq!(config.api.base_url, "https://shop.bioapp.mx/api");
    }

    #[test]
    fn test_invalid_base_url() {
        let err = load(&[("STOREFRONT_API_URL", "not a url")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(name, _) if name == "STOREFRONT_API_URL"));
    }

    #[test]
    fn test_tax_rate_out_of_range() {
        assert!(load(&[("STOREFRONT_TAX_RATE", "1.5")]).is_err());
        assert!(load(&[("STOREFRONT_TAX_RATE", "-0.1")]).is_err());
        assert!(load(&[("STOREFRONT_TAX_RATE", "abc")]).is_err());
        let config = load(&[("STOREFRONT_TAX_RATE", "0.16")]).unwrap();
        assert_eq!(config.tax_rate, Decimal::new(16, 2));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        assert!(load(&[("STOREFRONT_PAYMENT_TIMEOUT_SECS", "0")]).is_err());
        assert!(load(&[("STOREFRONT_REQUEST_TIMEOUT_SECS", "soon")]).is_err());
    }

    #[test]
    fn test_timeout_above_one_day_rejected() {
        let huge = u64::MAX.to_string();
        assert!(load(&[("STOREFRONT_PAYMENT_TIMEOUT_SECS", huge.as_str())]).is_err());
        assert!(load(&[("STOREFRONT_REQUEST_TIMEOUT_SECS", "86401")]).is_err());

        let config = load(&[("STOREFRONT_PAYMENT_TIMEOUT_SECS", "86400")]).unwrap();
        assert_eq!(config.payment_timeout, Duration::from_secs(MAX_TIMEOUT_SECS));
    }

    #[test]
    fn test_invalid_port() {
        assert!(load(&[("STOREFRONT_RETURN_PORT", "70000")]).is_err());
    }

    #[test]
    fn test_blank_token_is_ignored() {
        assert!(load(&[("STOREFRONT_API_TOKEN", "  ")]).unwrap().api.token.is_none());
        let config = load(&[("STOREFRONT_API_TOKEN", "tok_live_abc")]).unwrap();
        assert_eq!(config.api.token.unwrap().expose_secret(), "tok_live_abc");
    }

    #[test]
    fn test_api_config_debug_redacts_token() {
        let mut api = ApiConfig::new("https://shop.bioapp.mx/api");
        api.token = Some(SecretString::from("super_secret_token"));

        let debug_output = format!("{api:?}");

        assert!(debug_output.contains("shop.bioapp.mx"));
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super_secret_token"));
    }
}
