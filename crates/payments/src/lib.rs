//! Payment gateway adapters.
//!
//! Every provider is reached through the [`PaymentGateway`] trait:
//! - [`MomoGateway`]: MoMo e-wallet, HMAC-SHA256 signatures, JSON IPN
//! - [`VnpayGateway`]: VNPay, locally signed redirect URL, HMAC-SHA512, query-string IPN
//! - [`InMemoryGateway`]: deterministic test double
//!
//! Outbound calls run through [`resilience`]: bounded retry with exponential
//! backoff inside a per-adapter circuit breaker.

pub mod error;
pub mod gateway;
mod http;
pub mod memory;
pub mod momo;
pub mod reference;
pub mod registry;
pub mod resilience;
pub mod signing;
pub mod vnpay;

pub use error::GatewayError;
pub use gateway::{
    CallbackParams, PaymentGateway, PaymentRequest, RefundOutcome, RefundRequest, Verification,
    params_from_json,
};
pub use memory::InMemoryGateway;
pub use momo::{MomoConfig, MomoGateway};
pub use registry::GatewayRegistry;
pub use resilience::{CircuitBreakerConfig, ResilienceConfig, RetryPolicy};
pub use vnpay::{VnpayConfig, VnpayGateway};
