//! Adapter tests against a stubbed provider.

use std::time::Duration;

use chrono::Utc;
use common::{Money, OrderId, PaymentId};
use payments::{
    CircuitBreakerConfig, GatewayError, MomoConfig, MomoGateway, PaymentGateway, PaymentRequest,
    RefundRequest, ResilienceConfig, RetryPolicy, VnpayConfig, VnpayGateway,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_resilience(max_retries: usize, failure_threshold: usize) -> ResilienceConfig {
    ResilienceConfig {
        request_timeout: Duration::from_secs(2),
        retry: RetryPolicy::default()
            .with_max_retries(max_retries)
            .with_initial_delay(Duration::from_millis(1)),
        breaker: CircuitBreakerConfig {
            failure_threshold,
            open_timeout: Duration::from_secs(60),
        },
    }
}

fn momo(server: &MockServer, resilience: ResilienceConfig) -> MomoGateway {
    MomoGateway::new(
        MomoConfig::new(
            "MOMO",
            "access",
            "secret",
            format!("{}/v2/gateway/api/create", server.uri()),
            format!("{}/v2/gateway/api/refund", server.uri()),
        )
        .with_resilience(resilience),
    )
    .unwrap()
}

fn vnpay(server: &MockServer) -> VnpayGateway {
    VnpayGateway::new(
        VnpayConfig::new(
            "TMN01",
            "hash-secret",
            "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html",
            format!("{}/merchant_webapi/api/transaction", server.uri()),
        )
        .with_resilience(fast_resilience(3, 5)),
    )
    .unwrap()
}

fn payment_request() -> PaymentRequest {
    PaymentRequest {
        order_id: OrderId::new(42),
        payment_id: PaymentId::new(7),
        amount: Money::new(240_000),
        description: "Order 42".to_string(),
        return_url: "http://shop.test/payments/momo/return".to_string(),
        callback_url: "http://shop.test/payments/momo/ipn".to_string(),
        client_ip: None,
        created_at: Utc::now(),
    }
}

fn refund_request(transaction_id: &str) -> RefundRequest {
    RefundRequest {
        order_id: OrderId::new(42),
        payment_id: PaymentId::new(7),
        amount: Money::new(240_000),
        external_transaction_id: transaction_id.to_string(),
        reason: "Customer changed mind".to_string(),
        transaction_date: Utc::now(),
        client_ip: None,
    }
}

mod momo_adapter {
    use super::*;

    #[tokio::test]
    async fn create_payment_returns_pay_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/gateway/api/create"))
            .and(body_partial_json(json!({
                "partnerCode": "MOMO",
                "orderId": "42_7",
                "extraData": "42_7",
                "amount": 240000,
                "ipnUrl": "http://shop.test/payments/momo/ipn"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resultCode": 0,
                "message": "Successful.",
                "payUrl": "https://test-payment.momo.vn/pay/abc"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let url = momo(&server, fast_resilience(3, 5))
            .create_payment(&payment_request())
            .await
            .unwrap();
        assert_eq!(url, "https://test-payment.momo.vn/pay/abc");
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resultCode": 0,
                "message": "Successful.",
                "payUrl": "https://test-payment.momo.vn/pay/retry"
            })))
            .with_priority(2)
            .expect(1)
            .mount(&server)
            .await;

        let url = momo(&server, fast_resilience(3, 5))
            .create_payment(&payment_request())
            .await
            .unwrap();
        assert_eq!(url, "https://test-payment.momo.vn/pay/retry");
    }

    #[tokio::test]
    async fn business_rejection_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resultCode": 22,
                "message": "Amount out of range"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = momo(&server, fast_resilience(3, 5))
            .create_payment(&payment_request())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GatewayError::Rejected {
                code: "22".to_string(),
                message: "Amount out of range".to_string()
            }
        );
    }

    #[tokio::test]
    async fn breaker_opens_after_repeated_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .expect(2)
            .mount(&server)
            .await;

        let gateway = momo(&server, fast_resilience(0, 2));
        for _ in 0..2 {
            let err = gateway.create_payment(&payment_request()).await.unwrap_err();
            assert!(matches!(err, GatewayError::Provider { status: 502, .. }));
        }

        let err = gateway.create_payment(&payment_request()).await.unwrap_err();
        assert_eq!(err, GatewayError::CircuitOpen);
    }

    #[tokio::test]
    async fn refund_sends_numeric_trans_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/gateway/api/refund"))
            .and(body_partial_json(json!({
                "orderId": "42_7_refund",
                "transId": 4088878653_i64,
                "amount": 240000
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resultCode": 0,
                "message": "Thành công."
            })))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = momo(&server, fast_resilience(3, 5))
            .refund(&refund_request("4088878653"))
            .await
            .unwrap();
        assert!(outcome.succeeded);
        assert_eq!(outcome.provider_message, "Thành công.");
    }

    #[tokio::test]
    async fn refund_decline_is_reported_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resultCode": 1080,
                "message": "Refund amount exceeds transaction"
            })))
            .mount(&server)
            .await;

        let outcome = momo(&server, fast_resilience(3, 5))
            .refund(&refund_request("4088878653"))
            .await
            .unwrap();
        assert!(!outcome.succeeded);
        assert_eq!(outcome.provider_message, "Refund amount exceeds transaction");
    }

    #[tokio::test]
    async fn non_numeric_trans_id_is_refused_locally() {
        let server = MockServer::start().await;
        let err = momo(&server, fast_resilience(3, 5))
            .refund(&refund_request("abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(_)));
    }
}

mod vnpay_adapter {
    use super::*;

    #[tokio::test]
    async fn refund_is_signed_and_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/merchant_webapi/api/transaction"))
            .and(body_partial_json(json!({
                "vnp_Command": "refund",
                "vnp_TransactionType": "02",
                "vnp_TxnRef": "42_7",
                "vnp_Amount": "24000000",
                "vnp_TransactionNo": "14226112"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "vnp_ResponseCode": "00",
                "vnp_Message": "Refund success"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = vnpay(&server)
            .refund(&refund_request("14226112"))
            .await
            .unwrap();
        assert!(outcome.succeeded);
        assert_eq!(outcome.provider_message, "Refund success");
    }

    #[tokio::test]
    async fn refund_decline_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "vnp_ResponseCode": "94",
                "vnp_Message": "Duplicate refund request"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = vnpay(&server)
            .refund(&refund_request("14226112"))
            .await
            .unwrap();
        assert!(!outcome.succeeded);
        assert_eq!(outcome.provider_message, "Duplicate refund request");
    }

    #[tokio::test]
    async fn refund_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "vnp_ResponseCode": "00",
                "vnp_Message": "Refund success"
            })))
            .with_priority(2)
            .mount(&server)
            .await;

        let outcome = vnpay(&server)
            .refund(&refund_request("14226112"))
            .await
            .unwrap();
        assert!(outcome.succeeded);
    }
}
