//! Prometheus scrape endpoint and metric descriptions.

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use metrics::{Unit, describe_counter, describe_histogram};
use metrics_exporter_prometheus::PrometheusHandle;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// GET /metrics — renders every registered metric in the text exposition format.
pub async fn get(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        handle.render(),
    )
}

/// Registers help text for the checkout and gateway metrics.
///
/// Call once after the recorder is installed.
pub fn describe() {
    describe_counter!("orders_placed_total", "Orders placed, by payment method");
    describe_counter!(
        "order_reservation_conflicts_total",
        "Checkouts rejected for insufficient stock"
    );
    describe_counter!(
        "order_status_transitions_total",
        "Administrative status changes, by target status"
    );
    describe_counter!("orders_cancelled_total", "Orders cancelled");
    describe_counter!(
        "payment_callbacks_total",
        "Gateway returns and IPNs, by gateway, kind and outcome"
    );
    describe_counter!(
        "payment_signature_rejections_total",
        "Callbacks rejected for a bad signature"
    );
    describe_counter!("refunds_total", "Refund attempts, by gateway and outcome");
    describe_histogram!(
        "gateway_request_duration_seconds",
        Unit::Seconds,
        "Outbound gateway call latency including retries"
    );
    describe_counter!(
        "gateway_circuit_rejections_total",
        "Gateway calls refused by an open circuit"
    );
}
