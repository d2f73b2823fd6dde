//! Gateway return, IPN and refund endpoints.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, header};
use axum::response::Redirect;
use checkout::{CallbackOutcome, CheckoutError, RefundSummary};
use order_store::OrderStore;
use payments::{CallbackParams, params_from_json};
use serde::Deserialize;
use serde_json::Value;

use crate::auth::{Auth, ClientIp};
use crate::error::ApiError;
use crate::routes::orders::{AppState, parse_order_id};

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub order_id: String,
    pub reason: Option<String>,
}

/// GET /orders/payment/{gateway}/return — verify the browser return and
/// send the customer to the storefront result page.
///
/// Always a redirect: any processing error lands on the failure page.
#[tracing::instrument(skip(state, params))]
pub async fn return_redirect<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(gateway): Path<String>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Redirect {
    let target = match state.checkout.callbacks.handle_return(&gateway, &params).await {
        Ok(outcome) => storefront_target(&state, &outcome),
        Err(CheckoutError::Signature { .. }) => state.storefront.failure.clone(),
        Err(err @ CheckoutError::NotFound { .. }) => {
            tracing::warn!(error = %err, "Payment return for unknown resource");
            state.storefront.failure.clone()
        }
        Err(err) => {
            tracing::error!(error = %err, "Payment return could not be processed");
            state.storefront.failure.clone()
        }
    };
    Redirect::to(&target)
}

fn storefront_target<S: OrderStore>(state: &AppState<S>, outcome: &CallbackOutcome) -> String {
    let base = if outcome.is_paid() {
        &state.storefront.success
    } else {
        &state.storefront.failure
    };
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}order_id={}", outcome.order_id())
}

/// GET /orders/payment/{gateway}/ipn — IPN delivered as query parameters.
#[tracing::instrument(skip(state, params))]
pub async fn ipn_query<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(gateway): Path<String>,
    Query(params): Query<BTreeMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let ack = state.checkout.callbacks.handle_ipn(&gateway, &params).await?;
    Ok(Json(ack))
}

/// POST /orders/payment/{gateway}/ipn — IPN delivered as a JSON or form body.
///
/// Always 200 for a known gateway, whatever the processing outcome.
#[tracing::instrument(skip(state, headers, body))]
pub async fn ipn_body<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(gateway): Path<String>,
    Query(query): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let params = body_params(&headers, &body).unwrap_or(query);
    let ack = state.checkout.callbacks.handle_ipn(&gateway, &params).await?;
    Ok(Json(ack))
}

/// Decodes an IPN body. Returns `None` for an empty or undecodable body, in
/// which case the query string is used.
fn body_params(headers: &HeaderMap, body: &[u8]) -> Option<CallbackParams> {
    if body.is_empty() {
        return None;
    }
    let is_form = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));

    if !is_form && let Ok(json) = serde_json::from_slice::<Value>(body) {
        return Some(params_from_json(&json));
    }
    match serde_urlencoded::from_bytes::<CallbackParams>(body) {
        Ok(params) => Some(params),
        Err(err) => {
            tracing::warn!(error = %err, "undecodable IPN body");
            None
        }
    }
}

/// POST /orders/payment/{gateway}/refund — manual refund (admin).
#[tracing::instrument(skip(state, principal, client_ip, req))]
pub async fn refund<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Auth(principal): Auth,
    client_ip: ClientIp,
    Path(gateway): Path<String>,
    Json(req): Json<RefundRequest>,
) -> Result<Json<RefundSummary>, ApiError> {
    let order_id = parse_order_id(&req.order_id)?;
    let summary = state
        .checkout
        .cancellations
        .refund(&principal, &gateway, order_id, req.reason, client_ip.0)
        .await?;
    Ok(Json(summary))
}
