use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Money, OrderId, PaymentId};
use domain::PaymentMethod;
use serde_json::Value;

use crate::GatewayError;

/// Raw callback parameters as delivered by a provider, sorted by key.
pub type CallbackParams = BTreeMap<String, String>;

/// Flattens a JSON callback body into string parameters.
///
/// Scalars are stringified the way the provider signed them (numbers without
/// quotes, booleans as `true`/`false`). Nested values and nulls are dropped.
pub fn params_from_json(body: &Value) -> CallbackParams {
    let Value::Object(map) = body else {
        return CallbackParams::new();
    };
    map.iter()
        .filter_map(|(key, value)| {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return None,
            };
            Some((key.clone(), text))
        })
        .collect()
}

/// Everything an adapter needs to open a payment with its provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub order_id: OrderId,
    pub payment_id: PaymentId,
    pub amount: Money,
    pub description: String,
    /// Where the provider sends the customer's browser afterwards.
    pub return_url: String,
    /// Where the provider posts its server-to-server notification.
    pub callback_url: String,
    pub client_ip: Option<String>,
    /// Creation time of the payment attempt.
    pub created_at: DateTime<Utc>,
}

/// A full refund of a captured payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundRequest {
    pub order_id: OrderId,
    pub payment_id: PaymentId,
    pub amount: Money,
    pub external_transaction_id: String,
    pub reason: String,
    /// Creation time of the original payment attempt.
    pub transaction_date: DateTime<Utc>,
    pub client_ip: Option<String>,
}

/// Result of checking a return or IPN payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Verification {
    /// Signature matched and every mandatory field was present.
    pub valid: bool,
    pub order_id: Option<OrderId>,
    /// The attempt named by the reference, when the reference carries one.
    pub payment_id: Option<PaymentId>,
    pub succeeded: bool,
    pub external_transaction_id: Option<String>,
    pub amount: Option<Money>,
    pub result_code: Option<String>,
    pub message: Option<String>,
}

impl Verification {
    pub fn invalid() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundOutcome {
    pub succeeded: bool,
    /// Provider message, passed through verbatim.
    pub provider_message: String,
}

/// One payment provider.
///
/// Verification is pure and never errors: anything that cannot be verified is
/// reported as [`Verification::invalid`]. Outbound calls go through the
/// adapter's retry and circuit breaker.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn method(&self) -> PaymentMethod;

    /// Opens a payment and returns the URL the customer is redirected to.
    async fn create_payment(&self, request: &PaymentRequest) -> Result<String, GatewayError>;

    /// Verifies the parameters of a browser return.
    fn verify_return(&self, params: &CallbackParams) -> Verification;

    /// Verifies the parameters of a server-to-server notification.
    fn verify_ipn(&self, params: &CallbackParams) -> Verification;

    /// Requests a full refund of a captured payment.
    async fn refund(&self, request: &RefundRequest) -> Result<RefundOutcome, GatewayError>;

    /// Body the provider expects in answer to an IPN.
    fn ipn_ack(&self) -> Value;
}
