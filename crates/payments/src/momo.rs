//! MoMo e-wallet adapter.
//!
//! Payments are opened with a signed JSON request; the provider answers with
//! a `payUrl`. Returns arrive as query parameters and IPNs as a JSON body,
//! both carrying the same HMAC-SHA256 signature.

use async_trait::async_trait;
use common::Money;
use domain::PaymentMethod;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::gateway::{
    CallbackParams, PaymentGateway, PaymentRequest, RefundOutcome, RefundRequest, Verification,
};
use crate::resilience::{ResilienceConfig, ResilientCaller};
use crate::signing::Digest;
use crate::{GatewayError, http, reference};

const GATEWAY: &str = "momo";

/// Fields of a return or IPN, in signature order. `accessKey` is prepended
/// from configuration.
const CALLBACK_FIELDS: [&str; 12] = [
    "amount",
    "extraData",
    "message",
    "orderId",
    "orderInfo",
    "orderType",
    "partnerCode",
    "payType",
    "requestId",
    "responseTime",
    "resultCode",
    "transId",
];

#[derive(Debug, Clone)]
pub struct MomoConfig {
    pub partner_code: String,
    pub access_key: String,
    pub secret_key: String,
    pub endpoint: String,
    pub refund_endpoint: String,
    pub request_type: String,
    pub lang: String,
    pub resilience: ResilienceConfig,
}

impl MomoConfig {
    pub fn new(
        partner_code: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        endpoint: impl Into<String>,
        refund_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            partner_code: partner_code.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            endpoint: endpoint.into(),
            refund_endpoint: refund_endpoint.into(),
            request_type: "captureWallet".to_string(),
            lang: "vi".to_string(),
            resilience: ResilienceConfig::default(),
        }
    }

    pub fn with_resilience(mut self, resilience: ResilienceConfig) -> Self {
        self.resilience = resilience;
        self
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateBody<'a> {
    partner_code: &'a str,
    request_id: &'a str,
    amount: i64,
    order_id: &'a str,
    order_info: &'a str,
    redirect_url: &'a str,
    ipn_url: &'a str,
    request_type: &'a str,
    extra_data: &'a str,
    lang: &'a str,
    signature: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateResponse {
    result_code: i64,
    #[serde(default)]
    message: String,
    pay_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefundBody<'a> {
    partner_code: &'a str,
    order_id: &'a str,
    request_id: &'a str,
    amount: i64,
    trans_id: i64,
    lang: &'a str,
    description: &'a str,
    signature: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefundResponse {
    result_code: i64,
    #[serde(default)]
    message: String,
}

pub struct MomoGateway {
    config: MomoConfig,
    client: reqwest::Client,
    caller: ResilientCaller,
}

impl MomoGateway {
    pub fn new(config: MomoConfig) -> Result<Self, GatewayError> {
        let client = http::client(config.resilience.request_timeout)?;
        let caller = ResilientCaller::new(GATEWAY, &config.resilience);
        Ok(Self {
            config,
            client,
            caller,
        })
    }

    fn sign(&self, raw: &str) -> Result<String, GatewayError> {
        Digest::Sha256.sign(&self.config.secret_key, raw)
    }

    fn verify(&self, params: &CallbackParams) -> Verification {
        let Some(signature) = params.get("signature") else {
            tracing::debug!(gateway = GATEWAY, "Callback without signature");
            return Verification::invalid();
        };

        let mut raw = format!("accessKey={}", self.config.access_key);
        for field in CALLBACK_FIELDS {
            let Some(value) = params.get(field) else {
                tracing::debug!(gateway = GATEWAY, field, "Callback missing mandatory field");
                return Verification::invalid();
            };
            raw.push('&');
            raw.push_str(field);
            raw.push('=');
            raw.push_str(value);
        }

        if !Digest::Sha256.verify(&self.config.secret_key, &raw, signature) {
            return Verification::invalid();
        }
        if params["partnerCode"] != self.config.partner_code {
            tracing::debug!(gateway = GATEWAY, "Callback for another partner code");
            return Verification::invalid();
        }

        let Some((order_id, payment_id)) = reference::parse(&params["orderId"]) else {
            return Verification::invalid();
        };
        let Ok(amount) = params["amount"].parse::<i64>() else {
            return Verification::invalid();
        };

        let result_code = params["resultCode"].clone();
        let succeeded = result_code == "0";
        let trans_id = params["transId"].trim();
        let external_transaction_id =
            (!trans_id.is_empty() && trans_id != "0").then(|| trans_id.to_string());
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
            result_code: Some(result_code),
            message: Some(params["message"].clone()),
        }
    }
}

#[async_trait]
impl PaymentGateway for MomoGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Momo
    }

    #[tracing::instrument(skip(self, request), fields(gateway = GATEWAY, order_id = %request.order_id))]
    async fn create_payment(&self, request: &PaymentRequest) -> Result<String, GatewayError> {
        let order_ref = reference::build(request.order_id, request.payment_id);
        let request_id = Uuid::new_v4().to_string();
        let amount = request.amount.amount();
        let cfg = &self.config;

        let raw = format!(
            "accessKey={}&amount={}&extraData={}&ipnUrl={}&orderId={}&orderInfo={}&partnerCode={}&redirectUrl={}&requestId={}&requestType={}",
            cfg.access_key,
            amount,
            order_ref,
            request.callback_url,
            order_ref,
            request.description,
            cfg.partner_code,
            request.return_url,
            request_id,
            cfg.request_type,
        );
        let body = CreateBody {
            partner_code: &cfg.partner_code,
            request_id: &request_id,
            amount,
            order_id: &order_ref,
            order_info: &request.description,
            redirect_url: &request.return_url,
            ipn_url: &request.callback_url,
            request_type: &cfg.request_type,
            extra_data: &order_ref,
            lang: &cfg.lang,
            signature: self.sign(&raw)?,
        };

        let response: CreateResponse = self
            .caller
            .call("create_payment", || {
                http::post_json(&self.client, &cfg.endpoint, &body)
            })
            .await?;

        if response.result_code != 0 {
            return Err(GatewayError::Rejected {
                code: response.result_code.to_string(),
                message: response.message,
            });
        }
        response
            .pay_url
            .filter(|url| !url.is_empty())
            .ok_or_else(|| GatewayError::Decode("response without payUrl".to_string()))
    }

    fn verify_return(&self, params: &CallbackParams) -> Verification {
        self.verify(params)
    }

    fn verify_ipn(&self, params: &CallbackParams) -> Verification {
        self.verify(params)
    }

    #[tracing::instrument(skip(self, request), fields(gateway = GATEWAY, order_id = %request.order_id))]
    async fn refund(&self, request: &RefundRequest) -> Result<RefundOutcome, GatewayError> {
        let trans_id: i64 = request.external_transaction_id.parse().map_err(|_| {
            GatewayError::InvalidRequest(format!(
                "MoMo transaction id must be numeric, got {:?}",
                request.external_transaction_id
            ))
        })?;
        let refund_ref = format!(
            "{}_refund",
            reference::build(request.order_id, request.payment_id)
        );
        let request_id = Uuid::new_v4().to_string();
        let amount = request.amount.amount();
        let cfg = &self.config;

        let raw = format!(
            "accessKey={}&amount={}&description={}&orderId={}&partnerCode={}&requestId={}&transId={}",
            cfg.access_key, amount, request.reason, refund_ref, cfg.partner_code, request_id, trans_id,
        );
        let body = RefundBody {
            partner_code: &cfg.partner_code,
            order_id: &refund_ref,
            request_id: &request_id,
            amount,
            trans_id,
            lang: &cfg.lang,
            description: &request.reason,
            signature: self.sign(&raw)?,
        };

        let response: RefundResponse = self
            .caller
            .call("refund", || {
                http::post_json(&self.client, &cfg.refund_endpoint, &body)
            })
            .await?;

        Ok(RefundOutcome {
            succeeded: response.result_code == 0,
            provider_message: response.message,
        })
    }

    fn ipn_ack(&self) -> Value {
        json!({})
    }
}
