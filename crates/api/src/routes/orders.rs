//! Order endpoints: checkout, queries, status, cancellation and repayment.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, NaiveDate, Utc};
use checkout::{CancellationOutcome, Checkout, OrderDetails, PlacedOrder, Repayment};
use common::{Money, OrderId, UserId, VariantId};
use domain::{
    Contact, LineRequest, Order, OrderStatus, PaymentMethod, PlaceOrder, ShippingAddress,
};
use order_store::{OrderQuery, OrderStore, Page};
use serde::{Deserialize, Serialize};

use crate::auth::{Auth, ClientIp};
use crate::config::StorefrontUrls;
use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S: OrderStore> {
    pub checkout: Checkout<S>,
    pub storefront: StorefrontUrls,
}

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub contact: Contact,
    pub shipping: ShippingAddress,
    pub items: Vec<OrderItemRequest>,
    #[serde(alias = "couponCode")]
    pub coupon_code: Option<String>,
    #[serde(default, alias = "paymentMethod")]
    pub payment_method: PaymentMethod,
    #[serde(default, alias = "shippingFee")]
    pub shipping_fee: i64,
    pub subtotal: Option<i64>,
    pub total: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct OrderItemRequest {
    #[serde(alias = "variantId")]
    pub variant_id: i64,
    pub quantity: i64,
    #[serde(alias = "unitPrice")]
    pub unit_price: Option<i64>,
}

impl CreateOrderRequest {
    fn into_command(self, user_id: Option<UserId>) -> Result<PlaceOrder, ApiError> {
        let lines = self
            .items
            .into_iter()
            .map(|item| {
                let variant_id = VariantId::new(item.variant_id);
                if variant_id.get() <= 0 {
                    return Err(ApiError::BadRequest(format!(
                        "invalid variant id {}",
                        item.variant_id
                    )));
                }
                Ok(LineRequest::new(
                    variant_id,
                    item.quantity,
                    item.unit_price.map(Money::new),
                ))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PlaceOrder {
            user_id,
            contact: self.contact,
            shipping: self.shipping,
            lines,
            coupon_code: self.coupon_code,
            payment_method: self.payment_method,
            shipping_fee: Money::new(self.shipping_fee),
            declared_subtotal: self.subtotal.map(Money::new),
            declared_total: self.total.map(Money::new),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListOrdersParams {
    pub status: Option<String>,
    pub user_id: Option<i64>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub search: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl ListOrdersParams {
    fn into_query(self) -> Result<OrderQuery, ApiError> {
        let mut query = OrderQuery::new().paginate(
            self.page.unwrap_or(1),
            self.limit.unwrap_or(order_store::query::DEFAULT_PAGE_SIZE),
        );
        if let Some(status) = self.status.as_deref().filter(|s| !s.is_empty()) {
            query = query.status(status.parse::<OrderStatus>()?);
        }
        if let Some(user_id) = self.user_id {
            query.user_id = Some(UserId::new(user_id));
        }
        let from = self
            .from
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|d| d.and_utc());
        let to = self
            .to
            .and_then(|d| d.and_hms_opt(23, 59, 59))
            .map(|d| d.and_utc());
        query = query.placed_between(from, to);
        if let Some(search) = self.search {
            query = query.phone(search);
        }
        Ok(query)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
    #[serde(alias = "shippedAt")]
    pub shipped_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RepaymentRequest {
    pub method: PaymentMethod,
}

// -- Response types --

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total_items: u64,
    pub total_pages: u64,
}

#[derive(Debug, Serialize)]
pub struct OrderListResponse {
    pub data: Vec<Order>,
    pub pagination: Pagination,
}

impl From<Page<Order>> for OrderListResponse {
    fn from(page: Page<Order>) -> Self {
        let pagination = Pagination {
            page: page.page,
            limit: page.limit,
            total_items: page.total_items,
            total_pages: page.total_pages(),
        };
        Self {
            data: page.items,
            pagination,
        }
    }
}

// -- Handlers --

/// POST /orders — place an order. Guests are allowed.
#[tracing::instrument(skip(state, auth, client_ip, req))]
pub async fn create<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    auth: Option<Auth>,
    client_ip: ClientIp,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<PlacedOrder>), ApiError> {
    let command = req.into_command(auth.map(|Auth(p)| p.user_id))?;
    let placed = state
        .checkout
        .orders
        .place_order(command, client_ip.0)
        .await?;
    Ok((StatusCode::CREATED, Json(placed)))
}

/// GET /orders — list orders with filters (admin).
#[tracing::instrument(skip(state, principal))]
pub async fn list<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Auth(principal): Auth,
    Query(params): Query<ListOrdersParams>,
) -> Result<Json<OrderListResponse>, ApiError> {
    let query = params.into_query()?;
    let page = state.checkout.orders.list_orders(&principal, &query).await?;
    Ok(Json(page.into()))
}

/// GET /orders/user/me — the caller's own orders.
#[tracing::instrument(skip(state, principal))]
pub async fn mine<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Auth(principal): Auth,
    Query(params): Query<PageParams>,
) -> Result<Json<OrderListResponse>, ApiError> {
    let page = state
        .checkout
        .orders
        .list_my_orders(
            &principal,
            params.page.unwrap_or(1),
            params.limit.unwrap_or(order_store::query::DEFAULT_PAGE_SIZE),
        )
        .await?;
    Ok(Json(page.into()))
}

/// GET /orders/{id} — an order with its latest payment (owner or admin).
#[tracing::instrument(skip(state, principal))]
pub async fn get<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Auth(principal): Auth,
    Path(id): Path<String>,
) -> Result<Json<OrderDetails>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let details = state.checkout.orders.get_order(&principal, order_id).await?;
    Ok(Json(details))
}

/// PATCH /orders/{id}/status — advance the order status (admin).
#[tracing::instrument(skip(state, principal, req))]
pub async fn update_status<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Auth(principal): Auth,
    Path(id): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<Order>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let target: OrderStatus = req.status.parse()?;
    let order = state
        .checkout
        .orders
        .update_status(&principal, order_id, target, req.shipped_at)
        .await?;
    Ok(Json(order))
}

/// POST /orders/{id}/cancel — cancel, restore stock and refund (owner or admin).
///
/// The body is optional.
#[tracing::instrument(skip(state, principal, client_ip, body))]
pub async fn cancel<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Auth(principal): Auth,
    client_ip: ClientIp,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<CancellationOutcome>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let req: CancelRequest = if body.is_empty() {
        CancelRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid cancel body: {e}")))?
    };

    let outcome = state
        .checkout
        .cancellations
        .cancel(&principal, order_id, req.reason, client_ip.0)
        .await?;
    Ok(Json(outcome))
}

/// POST /orders/{id}/repayment — open a new gateway payment for an unpaid order.
#[tracing::instrument(skip(state, principal, client_ip, req))]
pub async fn repay<S: OrderStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Auth(principal): Auth,
    client_ip: ClientIp,
    Path(id): Path<String>,
    Json(req): Json<RepaymentRequest>,
) -> Result<Json<Repayment>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let repayment = state
        .checkout
        .orders
        .repay(&principal, order_id, req.method, client_ip.0)
        .await?;
    Ok(Json(repayment))
}

pub(crate) fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid order ID: {e}")))
}
