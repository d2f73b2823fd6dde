//! VNPay adapter.
//!
//! The payment URL is built and signed locally (HMAC-SHA512 over the sorted,
//! form-urlencoded `vnp_*` parameters). Returns and IPNs are both query
//! strings. Refunds go through the merchant API as signed JSON.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::Money;
use domain::PaymentMethod;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::gateway::{
    CallbackParams, PaymentGateway, PaymentRequest, RefundOutcome, RefundRequest, Verification,
};
use crate::resilience::{ResilienceConfig, ResilientCaller};
use crate::signing::Digest;
use crate::{GatewayError, http, reference};

const GATEWAY: &str = "vnpay";
const SUCCESS: &str = "00";
const DEFAULT_IP: &str = "127.0.0.1";
const PAYMENT_TTL_MINUTES: i64 = 15;

#[derive(Debug, Clone)]
pub struct VnpayConfig {
    pub tmn_code: String,
    pub hash_secret: String,
    /// Customer-facing payment page.
    pub pay_url: String,
    /// Merchant API used for refunds.
    pub api_url: String,
    pub version: String,
    pub locale: String,
    pub resilience: ResilienceConfig,
}

impl VnpayConfig {
    pub fn new(
        tmn_code: impl Into<String>,
        hash_secret: impl Into<String>,
        pay_url: impl Into<String>,
        api_url: impl Into<String>,
    ) -> Self {
        Self {
            tmn_code: tmn_code.into(),
            hash_secret: hash_secret.into(),
            pay_url: pay_url.into(),
            api_url: api_url.into(),
            version: "2.1.0".to_string(),
            locale: "vn".to_string(),
            resilience: ResilienceConfig::default(),
        }
    }

    pub fn with_resilience(mut self, resilience: ResilienceConfig) -> Self {
        self.resilience = resilience;
        self
    }
}

/// VNPay timestamps are `yyyyMMddHHmmss` in Vietnam time (UTC+7).
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    (at + Duration::hours(7)).format("%Y%m%d%H%M%S").to_string()
}

fn describe_response_code(code: &str) -> String {
    match code {
        "00" => "Transaction successful".to_string(),
        "07" => "Transaction suspected of fraud".to_string(),
        "09" => "Card or account not registered for internet banking".to_string(),
        "11" => "Payment timed out".to_string(),
        "12" => "Card or account is locked".to_string(),
        "24" => "Customer cancelled the transaction".to_string(),
        "51" => "Insufficient balance".to_string(),
        "65" => "Daily transaction limit exceeded".to_string(),
        "75" => "Bank is under maintenance".to_string(),
        other => format!("Payment failed with response code {other}"),
    }
}

#[derive(Debug, Deserialize)]
struct RefundResponse {
    #[serde(rename = "vnp_ResponseCode")]
    response_code: String,
    #[serde(rename = "vnp_Message", default)]
    message: String,
}

pub struct VnpayGateway {
    config: VnpayConfig,
    client: reqwest::Client,
    caller: ResilientCaller,
}

impl VnpayGateway {
    pub fn new(config: VnpayConfig) -> Result<Self, GatewayError> {
        let client = http::client(config.resilience.request_timeout)?;
        let caller = ResilientCaller::new(GATEWAY, &config.resilience);
        Ok(Self {
            config,
            client,
            caller,
        })
    }

    fn sign(&self, data: &str) -> Result<String, GatewayError> {
        Digest::Sha512.sign(&self.config.hash_secret, data)
    }

    fn verify(&self, params: &CallbackParams) -> Verification {
        let Some(signature) = params.get("vnp_SecureHash") else {
            tracing::debug!(gateway = GATEWAY, "Callback without signature");
            return Verification::invalid();
        };

        let signed: BTreeMap<&str, &str> = params
            .iter()
            .filter(|(k, _)| {
                k.starts_with("vnp_") && *k != "vnp_SecureHash" && *k != "vnp_SecureHashType"
            })
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let Ok(canonical) = serde_urlencoded::to_string(&signed) else {
            return Verification::invalid();
        };
        if !Digest::Sha512.verify(&self.config.hash_secret, &canonical, signature) {
            return Verification::invalid();
        }

        let (Some(tmn_code), Some(txn_ref), Some(code), Some(amount)) = (
            signed.get("vnp_TmnCode"),
            signed.get("vnp_TxnRef"),
            signed.get("vnp_ResponseCode"),
            signed.get("vnp_Amount"),
        ) else {
            tracing::debug!(gateway = GATEWAY, "Callback missing mandatory field");
            return Verification::invalid();
        };
        if *tmn_code != self.config.tmn_code {
            tracing::debug!(gateway = GATEWAY, "Callback for another terminal");
            return Verification::invalid();
        }
        let Some((order_id, payment_id)) = reference::parse(txn_ref) else {
            return Verification::invalid();
        };
        let Ok(minor) = amount.parse::<i64>() else {
            return Verification::invalid();
        };

        let status_ok = signed
            .get("vnp_TransactionStatus")
            .is_none_or(|status| *status == SUCCESS);
        let succeeded = *code == SUCCESS && status_ok;

        let external_transaction_id = signed
            .get("vnp_TransactionNo")
            .map(|no| no.trim())
            .filter(|no| !no.is_empty() && *no != "0")
            .map(str::to_string);
        if succeeded && external_transaction_id.is_none() {
            return Verification::invalid();
        }

        Verification {
            valid: true,
            order_id: Some(order_id),
            payment_id,
            succeeded,
            external_transaction_id,
            amount: Some(Money::from_minor_units(minor)),
            result_code: Some(code.to_string()),
            message: Some(describe_response_code(code)),
        }
    }
}

#[async_trait]
impl PaymentGateway for VnpayGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Vnpay
    }

    /// Builds the signed payment URL. No network call is made.
    ///
    /// The IPN endpoint is registered with VNPay out of band, so
    /// `callback_url` is not sent.
    #[tracing::instrument(skip(self, request), fields(gateway = GATEWAY, order_id = %request.order_id))]
    async fn create_payment(&self, request: &PaymentRequest) -> Result<String, GatewayError> {
        let cfg = &self.config;
        let created = format_timestamp(request.created_at);
        let expires = format_timestamp(request.created_at + Duration::minutes(PAYMENT_TTL_MINUTES));

        let params: BTreeMap<&str, String> = BTreeMap::from([
            ("vnp_Amount", request.amount.minor_units().to_string()),
            ("vnp_Command", "pay".to_string()),
            ("vnp_CreateDate", created),
            ("vnp_CurrCode", "VND".to_string()),
            ("vnp_ExpireDate", expires),
            (
                "vnp_IpAddr",
                request.client_ip.clone().unwrap_or_else(|| DEFAULT_IP.to_string()),
            ),
            ("vnp_Locale", cfg.locale.clone()),
            ("vnp_OrderInfo", request.description.clone()),
            ("vnp_OrderType", "other".to_string()),
            ("vnp_ReturnUrl", request.return_url.clone()),
            ("vnp_TmnCode", cfg.tmn_code.clone()),
            ("vnp_TxnRef", reference::build(request.order_id, request.payment_id)),
            ("vnp_Version", cfg.version.clone()),
        ]);

        let query = serde_urlencoded::to_string(&params)
            .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;
        let secure_hash = self.sign(&query)?;
        Ok(format!(
            "{}?{}&vnp_SecureHash={}",
            cfg.pay_url, query, secure_hash
        ))
    }

    fn verify_return(&self, params: &CallbackParams) -> Verification {
        self.verify(params)
    }

    fn verify_ipn(&self, params: &CallbackParams) -> Verification {
        self.verify(params)
    }

    #[tracing::instrument(skip(self, request), fields(gateway = GATEWAY, order_id = %request.order_id))]
    async fn refund(&self, request: &RefundRequest) -> Result<RefundOutcome, GatewayError> {
        let cfg = &self.config;
        let request_id = Uuid::new_v4().simple().to_string();
        let txn_ref = reference::build(request.order_id, request.payment_id);
        let amount = request.amount.minor_units().to_string();
        let transaction_date = format_timestamp(request.transaction_date);
        let create_date = format_timestamp(Utc::now());
        let ip = request.client_ip.as_deref().unwrap_or(DEFAULT_IP);
        let transaction_type = "02";
        let create_by = "system";

        let data = [
            request_id.as_str(),
            cfg.version.as_str(),
            "refund",
            cfg.tmn_code.as_str(),
            transaction_type,
            txn_ref.as_str(),
            amount.as_str(),
            request.external_transaction_id.as_str(),
            transaction_date.as_str(),
            create_by,
            create_date.as_str(),
            ip,
            request.reason.as_str(),
        ]
        .join("|");

        let body = json!({
            "vnp_RequestId": request_id,
            "vnp_Version": cfg.version,
            "vnp_Command": "refund",
            "vnp_TmnCode": cfg.tmn_code,
            "vnp_TransactionType": transaction_type,
            "vnp_TxnRef": txn_ref,
            "vnp_Amount": amount,
            "vnp_TransactionNo": request.external_transaction_id,
            "vnp_TransactionDate": transaction_date,
            "vnp_CreateBy": create_by,
            "vnp_CreateDate": create_date,
            "vnp_IpAddr": ip,
            "vnp_OrderInfo": request.reason,
            "vnp_SecureHash": self.sign(&data)?,
        });

        let response: RefundResponse = self
            .caller
            .call("refund", || http::post_json(&self.client, &cfg.api_url, &body))
            .await?;

        Ok(RefundOutcome {
            succeeded: response.response_code == SUCCESS,
            provider_message: response.message,
        })
    }

    fn ipn_ack(&self) -> Value {
        json!({"RspCode": "00", "Message": "Confirm Success"})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use common::{OrderId, PaymentId};

    fn gateway() -> VnpayGateway {
        VnpayGateway::new(VnpayConfig::new(
            "TMN01",
            "hash-secret",
            "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html",
            "http://localhost/merchant_webapi/api/transaction",
        ))
        .unwrap()
    }

    fn signed(overrides: &[(&str, &str)]) -> CallbackParams {
        let mut params: CallbackParams = [
            ("vnp_Amount", "24000000"),
            ("vnp_BankCode", "NCB"),
            ("vnp_OrderInfo", "Thanh toan don hang 42"),
            ("vnp_PayDate", "20240115103000"),
            ("vnp_ResponseCode", "00"),
            ("vnp_TmnCode", "TMN01"),
            ("vnp_TransactionNo", "14226112"),
            ("vnp_TransactionStatus", "00"),
            ("vnp_TxnRef", "42_7"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        for (k, v) in overrides {
            params.insert(k.to_string(), v.to_string());
        }
        let canonical = serde_urlencoded::to_string(&params).unwrap();
        let hash = Digest::Sha512.sign("hash-secret", &canonical).unwrap();
        params.insert("vnp_SecureHashType".to_string(), "HmacSHA512".to_string());
        params.insert("vnp_SecureHash".to_string(), hash);
        params
    }

    #[test]
    fn timestamps_are_rendered_in_vietnam_time() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 20, 30, 0).unwrap();
        assert_eq!(format_timestamp(at), "20240116033000");
    }

    #[test]
    fn valid_success_callback() {
        let v = gateway().verify_ipn(&signed(&[]));
        assert!(v.valid);
        assert!(v.succeeded);
        assert_eq!(v.order_id, Some(OrderId::new(42)));
        assert_eq!(v.payment_id, Some(PaymentId::new(7)));
        assert_eq!(v.amount, Some(Money::new(240_000)));
        assert_eq!(v.external_transaction_id.as_deref(), Some("14226112"));
    }

    #[test]
    fn cancelled_payment_is_valid_failure() {
        let v = gateway().verify_return(&signed(&[
            ("vnp_ResponseCode", "24"),
            ("vnp_TransactionStatus", "02"),
            ("vnp_TransactionNo", "0"),
        ]));
        assert!(v.valid);
        assert!(!v.succeeded);
        assert_eq!(v.external_transaction_id, None);
        assert_eq!(v.message.as_deref(), Some("Customer cancelled the transaction"));
    }

    #[test]
    fn non_success_transaction_status_is_a_failure() {
        let v = gateway().verify_ipn(&signed(&[("vnp_TransactionStatus", "01")]));
        assert!(v.valid);
        assert!(!v.succeeded);
    }

    #[test]
    fn success_without_transaction_number_fails_closed() {
        let v = gateway().verify_ipn(&signed(&[("vnp_TransactionNo", "0")]));
        assert!(!v.valid);
    }

    #[test]
    fn tampering_fails_closed() {
        let mut params = signed(&[]);
        params.insert("vnp_Amount".to_string(), "100".to_string());
        assert!(!gateway().verify_ipn(&params).valid);

        let mut params = signed(&[]);
        params.remove("vnp_SecureHash");
        assert!(!gateway().verify_ipn(&params).valid);
    }

    #[test]
    fn foreign_terminal_is_rejected() {
        assert!(!gateway().verify_ipn(&signed(&[("vnp_TmnCode", "OTHER")])).valid);
    }

    #[tokio::test]
    async fn payment_url_is_signed_and_verifiable() {
        let gw = gateway();
        let created_at = Utc.with_ymd_and_hms(2024, 1, 15, 3, 0, 0).unwrap();
        let url = gw
            .create_payment(&PaymentRequest {
                order_id: OrderId::new(42),
                payment_id: PaymentId::new(7),
                amount: Money::new(240_000),
                description: "Thanh toan don hang 42".to_string(),
                return_url: "http://shop.test/payments/vnpay/return".to_string(),
                callback_url: "http://shop.test/payments/vnpay/ipn".to_string(),
                client_ip: None,
                created_at,
            })
            .await
            .unwrap();

        let (base, query) = url.split_once('?').unwrap();
        assert_eq!(base, "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html");

        let params: CallbackParams = serde_urlencoded::from_str(query).unwrap();
        assert_eq!(params["vnp_Amount"], "24000000");
        assert_eq!(params["vnp_TxnRef"], "42_7");
        assert_eq!(params["vnp_CreateDate"], "20240115100000");
        assert_eq!(params["vnp_IpAddr"], "127.0.0.1");
        assert!(query.contains("vnp_OrderInfo=Thanh+toan+don+hang+42"));

        let (unsigned, hash) = query.rsplit_once("&vnp_SecureHash=").unwrap();
        assert!(Digest::Sha512.verify("hash-secret", unsigned, hash));
    }

    #[test]
    fn ack_confirms_success() {
        assert_eq!(
            gateway().ipn_ack(),
            json!({"RspCode": "00", "Message": "Confirm Success"})
        );
    }
}
