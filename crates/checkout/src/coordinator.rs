//! Order placement, status updates, repayment and order queries.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::OrderId;
use domain::{
    Order, OrderDraft, OrderStatus, Payment, PaymentMethod, PlaceOrder, Principal,
    TransitionTable,
};
use order_store::{OrderQuery, OrderStore, Page, StoreError};
use payments::{GatewayError, GatewayRegistry, PaymentRequest};
use serde::Serialize;

use crate::error::{CheckoutError, Result};
use crate::notify::{Notifier, OrderEvent};

/// Builds the return and IPN URLs handed to providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackUrls {
    base: String,
}

impl CallbackUrls {
    pub fn new(public_base_url: impl Into<String>) -> Self {
        let base = public_base_url.into().trim_end_matches('/').to_string();
        Self { base }
    }

    pub fn return_url(&self, method: PaymentMethod) -> String {
        format!("{}/orders/payment/{}/return", self.base, method)
    }

    pub fn ipn_url(&self, method: PaymentMethod) -> String {
        format!("{}/orders/payment/{}/ipn", self.base, method)
    }
}

/// Result of a successful checkout.
///
/// The order is committed even when the redirect could not be produced; in
/// that case `payment_error` is set and the client can retry via repayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlacedOrder {
    pub order: Order,
    pub payment: Payment,
    pub redirect_url: Option<String>,
    pub payment_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Repayment {
    pub order: Order,
    pub payment: Payment,
    pub redirect_url: String,
}

/// An order with its latest payment attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderDetails {
    pub order: Order,
    pub payment: Option<Payment>,
}

/// Drives an order from checkout through its administrative lifecycle.
pub struct OrderCoordinator<S: OrderStore> {
    store: S,
    gateways: GatewayRegistry,
    notifier: Arc<dyn Notifier>,
    urls: CallbackUrls,
    table: &'static TransitionTable,
}

impl<S: OrderStore> OrderCoordinator<S> {
    pub fn new(
        store: S,
        gateways: GatewayRegistry,
        notifier: Arc<dyn Notifier>,
        urls: CallbackUrls,
    ) -> Self {
        Self {
            store,
            gateways,
            notifier,
            urls,
            table: TransitionTable::standard(),
        }
    }

    /// Validates, prices and reserves a new order, then opens its payment.
    ///
    /// Stock is reserved before any provider call. A gateway failure after the
    /// commit is reported through [`PlacedOrder::payment_error`].
    #[tracing::instrument(skip(self, request, client_ip), fields(payment_method = %request.payment_method))]
    pub async fn place_order(
        &self,
        request: PlaceOrder,
        client_ip: Option<String>,
    ) -> Result<PlacedOrder> {
        if let Some(user_id) = request.user_id
            && !self.store.user_exists(user_id).await?
        {
            return Err(CheckoutError::not_found("User", user_id));
        }
        if request.payment_method.is_gateway() && self.gateways.get(request.payment_method).is_none()
        {
            return Err(CheckoutError::Validation(format!(
                "payment method {} is not available",
                request.payment_method
            )));
        }

        let variants = self.store.get_variants(&request.variant_ids()).await?;
        let coupon = match request.coupon_code() {
            Some(code) => Some(
                self.store
                    .get_coupon_by_code(code)
                    .await?
                    .ok_or_else(|| CheckoutError::not_found("Coupon", code))?,
            ),
            None => None,
        };

        let draft = OrderDraft::build(&request, &variants, coupon.as_ref(), Utc::now())?;

        let (order, payment) = match self.store.create_order(&draft).await {
            Ok(created) => created,
            Err(err @ StoreError::InsufficientStock { .. }) => {
                metrics::counter!("order_reservation_conflicts_total").increment(1);
                tracing::info!(error = %err, "Reservation refused");
                return Err(err.into());
            }
            Err(err) => return Err(err.into()),
        };

        metrics::counter!(
            "orders_placed_total",
            "payment_method" => order.payment_method.as_str()
        )
        .increment(1);
        tracing::info!(order_id = %order.id, total = %order.total, "Order placed");
        self.notifier.notify(OrderEvent::OrderPlaced {
            order_id: order.id,
            user_id: order.user_id,
            total: order.total,
            payment_method: order.payment_method,
        });

        let (redirect_url, payment_error) = if payment.method.is_gateway() {
            match self.open_payment(&order, &payment, client_ip).await {
                Ok(url) => (Some(url), None),
                Err(err) => {
                    tracing::warn!(order_id = %order.id, error = %err, "Could not open gateway payment");
                    (None, Some(err.to_string()))
                }
            }
        } else {
            (None, None)
        };

        Ok(PlacedOrder {
            order,
            payment,
            redirect_url,
            payment_error,
        })
    }

    /// Moves an order along the transition table. Administrators only.
    ///
    /// Cancellation is refused here; it must restore stock and may refund.
    #[tracing::instrument(skip(self, principal), fields(order_id = %order_id, to = %target))]
    pub async fn update_status(
        &self,
        principal: &Principal,
        order_id: OrderId,
        target: OrderStatus,
        shipped_at: Option<DateTime<Utc>>,
    ) -> Result<Order> {
        principal.ensure_admin()?;
        if target == OrderStatus::Cancelled {
            return Err(CheckoutError::Validation(
                "orders are cancelled through the cancellation endpoint".to_string(),
            ));
        }

        let order = self.load(order_id).await?;
        let change = order.plan_transition(self.table, target, shipped_at, Utc::now())?;
        if change.is_noop() {
            return Ok(order);
        }

        let updated = self.store.update_order_status(&change).await?;

        metrics::counter!("order_status_transitions_total", "to" => target.as_str()).increment(1);
        tracing::info!(from = %change.from, "Order status updated");
        self.notifier.notify(OrderEvent::OrderStatusChanged {
            order_id,
            from: change.from,
            to: change.to,
        });
        Ok(updated)
    }

    /// Opens a fresh payment attempt for an unpaid order.
    #[tracing::instrument(skip(self, principal, client_ip), fields(order_id = %order_id, method = %method))]
    pub async fn repay(
        &self,
        principal: &Principal,
        order_id: OrderId,
        method: PaymentMethod,
        client_ip: Option<String>,
    ) -> Result<Repayment> {
        let order = self.load(order_id).await?;
        principal.ensure_can_manage(&order)?;

        if matches!(order.status, OrderStatus::Cancelled | OrderStatus::Delivered) {
            return Err(CheckoutError::Validation(format!(
                "order {} is {} and cannot be paid",
                order.id, order.status
            )));
        }
        if !method.is_gateway() || self.gateways.get(method).is_none() {
            return Err(CheckoutError::Validation(format!(
                "payment method {method} is not available for repayment"
            )));
        }
        let payments = self.store.list_payments(order_id).await?;
        if payments.iter().any(|p| p.paid) {
            return Err(CheckoutError::Conflict(format!(
                "order {order_id} is already paid"
            )));
        }

        let payment = self.store.create_payment(order_id, method, Utc::now()).await?;
        let redirect_url = self.open_payment(&order, &payment, client_ip).await?;

        tracing::info!(payment_id = %payment.id, "Repayment opened");
        Ok(Repayment {
            order,
            payment,
            redirect_url,
        })
    }

    /// Returns an order with its latest payment. Owner or administrator.
    pub async fn get_order(&self, principal: &Principal, order_id: OrderId) -> Result<OrderDetails> {
        let order = self.load(order_id).await?;
        principal.ensure_can_manage(&order)?;
        let payment = self.store.latest_payment(order_id).await?;
        Ok(OrderDetails { order, payment })
    }

    /// Lists all orders. Administrators only.
    pub async fn list_orders(&self, principal: &Principal, query: &OrderQuery) -> Result<Page<Order>> {
        principal.ensure_admin()?;
        Ok(self.store.list_orders(query).await?)
    }

    /// Lists the caller's own orders.
    pub async fn list_my_orders(
        &self,
        principal: &Principal,
        page: u32,
        limit: u32,
    ) -> Result<Page<Order>> {
        let query = OrderQuery::for_user(principal.user_id).paginate(page, limit);
        Ok(self.store.list_orders(&query).await?)
    }

    async fn load(&self, order_id: OrderId) -> Result<Order> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or_else(|| CheckoutError::not_found("Order", order_id))
    }

    async fn open_payment(
        &self,
        order: &Order,
        payment: &Payment,
        client_ip: Option<String>,
    ) -> std::result::Result<String, GatewayError> {
        let gateway = self.gateways.get(payment.method).ok_or_else(|| {
            GatewayError::Config(format!("no gateway registered for {}", payment.method))
        })?;

        gateway
            .create_payment(&PaymentRequest {
                order_id: order.id,
                payment_id: payment.id,
                amount: order.total,
                description: format!("Payment for order {}", order.id),
                return_url: self.urls.return_url(payment.method),
                callback_url: self.urls.ipn_url(payment.method),
                client_ip,
                created_at: payment.created_at,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_urls_use_the_public_base() {
        let urls = CallbackUrls::new("https://shop.example.com/");
        assert_eq!(
            urls.return_url(PaymentMethod::Momo),
            "https://shop.example.com/orders/payment/momo/return"
        );
        assert_eq!(
            urls.ipn_url(PaymentMethod::Vnpay),
            "https://shop.example.com/orders/payment/vnpay/ipn"
        );
    }
}
