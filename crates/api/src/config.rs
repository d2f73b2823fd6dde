//! Application configuration loaded from environment variables.

use std::time::Duration;

use payments::{
    CircuitBreakerConfig, MomoConfig, ResilienceConfig, RetryPolicy, VnpayConfig,
};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Where the browser lands after a gateway return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorefrontUrls {
    pub success: String,
    pub failure: String,
}

/// Server configuration with defaults for local development.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `json` for JSON lines, anything else for human output
/// - `DATABASE_URL`: PostgreSQL URL; absent means the in-memory store
/// - `DATABASE_MAX_CONNECTIONS` (default `10`)
/// - `PUBLIC_BASE_URL`: base of the return and IPN URLs given to providers
/// - `STOREFRONT_SUCCESS_URL`, `STOREFRONT_FAILURE_URL`
/// - `MOMO_PARTNER_CODE`, `MOMO_ACCESS_KEY`, `MOMO_SECRET_KEY`, `MOMO_ENDPOINT`, `MOMO_REFUND_ENDPOINT`
/// - `VNPAY_TMN_CODE`, `VNPAY_HASH_SECRET`, `VNPAY_URL`, `VNPAY_API`
/// - `GATEWAY_TIMEOUT_SECS` (default `10`), `GATEWAY_MAX_RETRIES` (default `3`),
///   `GATEWAY_BREAKER_THRESHOLD` (default `5`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub public_base_url: String,
    pub storefront: StorefrontUrls,
    pub momo: MomoConfig,
    pub vnpay: VnpayConfig,
}

fn var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let resilience = ResilienceConfig {
            request_timeout: Duration::from_secs(parse_or("GATEWAY_TIMEOUT_SECS", 10)),
            retry: RetryPolicy::default().with_max_retries(parse_or("GATEWAY_MAX_RETRIES", 3)),
            breaker: CircuitBreakerConfig {
                failure_threshold: parse_or("GATEWAY_BREAKER_THRESHOLD", 5),
                ..CircuitBreakerConfig::default()
            },
        };

        let defaults = Self::default();
        Self {
            host: var_or("HOST", &defaults.host),
            port: parse_or("PORT", defaults.port),
            log_level: var_or("RUST_LOG", &defaults.log_level),
            log_format: LogFormat::parse(&var_or("LOG_FORMAT", "pretty")),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            database_max_connections: parse_or(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            public_base_url: var_or("PUBLIC_BASE_URL", &defaults.public_base_url),
            storefront: StorefrontUrls {
                success: var_or("STOREFRONT_SUCCESS_URL", &defaults.storefront.success),
                failure: var_or("STOREFRONT_FAILURE_URL", &defaults.storefront.failure),
            },
            momo: MomoConfig::new(
                var_or("MOMO_PARTNER_CODE", &defaults.momo.partner_code),
                var_or("MOMO_ACCESS_KEY", &defaults.momo.access_key),
                var_or("MOMO_SECRET_KEY", &defaults.momo.secret_key),
                var_or("MOMO_ENDPOINT", &defaults.momo.endpoint),
                var_or("MOMO_REFUND_ENDPOINT", &defaults.momo.refund_endpoint),
            )
            .with_resilience(resilience.clone()),
            vnpay: VnpayConfig::new(
                var_or("VNPAY_TMN_CODE", &defaults.vnpay.tmn_code),
                var_or("VNPAY_HASH_SECRET", &defaults.vnpay.hash_secret),
                var_or("VNPAY_URL", &defaults.vnpay.pay_url),
                var_or("VNPAY_API", &defaults.vnpay.api_url),
            )
            .with_resilience(resilience),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            database_max_connections: 10,
            public_base_url: "http://localhost:3000".to_string(),
            storefront: StorefrontUrls {
                success: "http://localhost:5173/checkout/success".to_string(),
                failure: "http://localhost:5173/checkout/failure".to_string(),
            },
            momo: MomoConfig::new(
                "MOMO",
                "dev-access-key",
                "dev-secret-key",
                "https://test-payment.momo.vn/v2/gateway/api/create",
                "https://test-payment.momo.vn/v2/gateway/api/refund",
            ),
            vnpay: VnpayConfig::new(
                "DEVTMN01",
                "dev-hash-secret",
                "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html",
                "https://sandbox.vnpayment.vn/merchant_webapi/api/transaction",
            ),
        }
    }
}
