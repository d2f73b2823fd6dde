//! In-memory payment gateway for testing.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use common::{Money, OrderId, PaymentId};
use domain::PaymentMethod;
use serde_json::{Value, json};

use crate::gateway::{
    CallbackParams, PaymentGateway, PaymentRequest, RefundOutcome, RefundRequest, Verification,
};
use crate::signing::Digest;
use crate::{GatewayError, reference};

const SECRET: &str = "in-memory-secret";

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    created: Vec<PaymentRequest>,
    refunds: Vec<RefundRequest>,
    fail_on_create: bool,
    fail_on_refund: bool,
    refund_decline: Option<String>,
    refund_delay: Option<Duration>,
}

/// Gateway double that records requests and signs callbacks with a fixed
/// HMAC-SHA256 key.
///
/// Callback parameters: `reference`, `resultCode` (`0` = success),
/// `transactionId`, `amount`, `message`, `signature`.
#[derive(Debug, Clone)]
pub struct InMemoryGateway {
    method: PaymentMethod,
    state: Arc<RwLock<InMemoryGatewayState>>,
}

impl InMemoryGateway {
    pub fn new(method: PaymentMethod) -> Self {
        Self {
            method,
            state: Arc::default(),
        }
    }

    /// Makes `create_payment` fail with a transport error.
    pub fn set_fail_on_create(&self, fail: bool) {
        self.state.write().unwrap().fail_on_create = fail;
    }

    /// Makes `refund` fail with a transport error.
    pub fn set_fail_on_refund(&self, fail: bool) {
        self.state.write().unwrap().fail_on_refund = fail;
    }

    /// Makes `refund` answer with a provider decline carrying `message`.
    pub fn set_refund_declined(&self, message: Option<&str>) {
        self.state.write().unwrap().refund_decline = message.map(str::to_string);
    }

    /// Holds every `refund` call for `delay` before answering.
    pub fn set_refund_delay(&self, delay: Option<Duration>) {
        self.state.write().unwrap().refund_delay = delay;
    }

    pub fn created_payments(&self) -> Vec<PaymentRequest> {
        self.state.read().unwrap().created.clone()
    }

    pub fn refunds(&self) -> Vec<RefundRequest> {
        self.state.read().unwrap().refunds.clone()
    }

    /// Builds a correctly signed callback for the given attempt.
    pub fn callback(
        order_id: OrderId,
        payment_id: PaymentId,
        amount: Money,
        succeeded: bool,
        transaction_id: &str,
    ) -> CallbackParams {
        let mut params = CallbackParams::new();
        params.insert("reference".into(), reference::build(order_id, payment_id));
        params.insert("resultCode".into(), if succeeded { "0" } else { "1006" }.into());
        params.insert("transactionId".into(), transaction_id.into());
        params.insert("amount".into(), amount.amount().to_string());
        params.insert(
            "message".into(),
            if succeeded { "Successful." } else { "Transaction denied by user." }.into(),
        );
        Self::sign_callback(params)
    }

    /// Adds (or replaces) the `signature` parameter.
    pub fn sign_callback(mut params: CallbackParams) -> CallbackParams {
        params.remove("signature");
        let signature = Digest::Sha256
            .sign(SECRET, &canonical(&params))
            .unwrap_or_default();
        params.insert("signature".into(), signature);
        params
    }
}

fn canonical(params: &CallbackParams) -> String {
    params
        .iter()
        .filter(|(k, _)| k.as_str() != "signature")
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

#[async_trait]
impl PaymentGateway for InMemoryGateway {
    fn method(&self) -> PaymentMethod {
        self.method
    }

    async fn create_payment(&self, request: &PaymentRequest) -> Result<String, GatewayError> {
        let mut state = self.state.write().unwrap();
        if state.fail_on_create {
            return Err(GatewayError::Transport("Gateway unavailable".to_string()));
        }
        state.created.push(request.clone());
        Ok(format!(
            "https://gateway.test/{}/pay/{}",
            self.method,
            reference::build(request.order_id, request.payment_id)
        ))
    }

    fn verify_return(&self, params: &CallbackParams) -> Verification {
        self.verify_ipn(params)
    }

    fn verify_ipn(&self, params: &CallbackParams) -> Verification {
        let Some(signature) = params.get("signature") else {
            return Verification::invalid();
        };
        if !Digest::Sha256.verify(SECRET, &canonical(params), signature) {
            return Verification::invalid();
        }
        let (Some(reference), Some(code), Some(amount)) = (
            params.get("reference"),
            params.get("resultCode"),
            params.get("amount"),
        ) else {
            return Verification::invalid();
        };
        let (Some((order_id, payment_id)), Ok(amount)) =
            (reference::parse(reference), amount.parse::<i64>())
        else {
            return Verification::invalid();
        };

        let succeeded = code == "0";
        let external_transaction_id = params
            .get("transactionId")
            .filter(|id| !id.is_empty())
            .cloned();
        if succeeded && external_transaction_id.is_none() {
            return Verification::invalid();
        }

        Verification {
            valid: true,
            order_id: Some(order_id),
            payment_id,
            succeeded,
            external_transaction_id,
            amount: Some(Money::new(amount)),
            result_code: Some(code.clone()),
            message: params.get("message").cloned(),
        }
    }

    async fn refund(&self, request: &RefundRequest) -> Result<RefundOutcome, GatewayError> {
        let delay = self.state.read().unwrap().refund_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.write().unwrap();
        if state.fail_on_refund {
            return Err(GatewayError::Transport("Gateway unavailable".to_string()));
        }
        state.refunds.push(request.clone());
        Ok(match &state.refund_decline {
            Some(message) => RefundOutcome {
                succeeded: false,
                provider_message: message.clone(),
            },
            None => RefundOutcome {
                succeeded: true,
                provider_message: "Refund successful".to_string(),
            },
        })
    }

    fn ipn_ack(&self) -> Value {
        json!({})
    }
}
