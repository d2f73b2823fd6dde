use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, PaymentId, UserId, VariantId};
use domain::{
    Cancellation, Coupon, Order, OrderDraft, OrderStatus, Payment, PaymentConfirmation,
    PaymentFailure, PaymentMethod, StatusChange, Variant,
};
use tokio::sync::RwLock;

use crate::{
    ConfirmationOutcome, OrderQuery, Page, Result, StoreError, store::OrderStore,
};

#[derive(Default)]
struct State {
    variants: BTreeMap<VariantId, Variant>,
    coupons: HashMap<String, Coupon>,
    users: HashSet<UserId>,
    orders: BTreeMap<OrderId, Order>,
    payments: BTreeMap<PaymentId, Payment>,
    notifications: HashSet<(PaymentMethod, String)>,
    last_order_id: i64,
    last_payment_id: i64,
}

impl State {
    fn latest_payment_id(&self, order_id: OrderId) -> Option<PaymentId> {
        self.payments
            .values()
            .filter(|p| p.order_id == order_id)
            .map(|p| p.id)
            .max()
    }

    /// Resolves the attempt a callback settles: the named one if it belongs
    /// to the order, otherwise the latest.
    fn settled_payment_id(
        &self,
        order_id: OrderId,
        payment_id: Option<PaymentId>,
    ) -> Result<PaymentId> {
        match payment_id {
            Some(id) => self
                .payments
                .get(&id)
                .filter(|p| p.order_id == order_id)
                .map(|p| p.id)
                .ok_or_else(|| StoreError::not_found("Payment", id)),
            None => self
                .latest_payment_id(order_id)
                .ok_or_else(|| StoreError::not_found("Payment", order_id)),
        }
    }

    fn payments_of(&self, order_id: OrderId) -> Vec<Payment> {
        self.payments
            .values()
            .filter(|p| p.order_id == order_id)
            .cloned()
            .collect()
    }

    fn insert_payment(
        &mut self,
        order_id: OrderId,
        method: PaymentMethod,
        at: DateTime<Utc>,
    ) -> Payment {
        self.last_payment_id += 1;
        let payment = Payment {
            id: PaymentId::new(self.last_payment_id),
            order_id,
            method,
            paid: false,
            external_transaction_id: None,
            paid_at: None,
            failure_reason: None,
            refunded_at: None,
            refund_started_at: None,
            created_at: at,
        };
        self.payments.insert(payment.id, payment.clone());
        payment
    }

    fn check_status(&self, order_id: OrderId, expected: OrderStatus) -> Result<()> {
        let order = self
            .orders
            .get(&order_id)
            .ok_or_else(|| StoreError::not_found("Order", order_id))?;
        if order.status != expected {
            return Err(StoreError::StatusConflict {
                order_id,
                expected,
                actual: order.status,
            });
        }
        Ok(())
    }
}

/// In-memory order store for tests and local runs.
///
/// A single lock guards all tables, so every operation is trivially atomic.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryOrderStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds or replaces a catalog variant.
    pub async fn insert_variant(&self, variant: Variant) {
        self.state
            .write()
            .await
            .variants
            .insert(variant.id, variant);
    }

    /// Seeds or replaces a coupon, keyed by code.
    pub async fn insert_coupon(&self, coupon: Coupon) {
        self.state
            .write()
            .await
            .coupons
            .insert(coupon.code.clone(), coupon);
    }

    pub async fn insert_user(&self, user_id: UserId) {
        self.state.write().await.users.insert(user_id);
    }

    /// Returns the current stock count of a variant.
    pub async fn available(&self, variant_id: VariantId) -> Option<i64> {
        self.state
            .read()
            .await
            .variants
            .get(&variant_id)
            .map(|v| v.available)
    }

    /// Returns every payment attempt of an order, oldest first.
    pub async fn payments_for(&self, order_id: OrderId) -> Vec<Payment> {
        self.state.read().await.payments_of(order_id)
    }

    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn get_variants(&self, ids: &[VariantId]) -> Result<HashMap<VariantId, Variant>> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.variants.get(id))
            .map(|v| (v.id, v.clone()))
            .collect())
    }

    async fn get_coupon_by_code(&self, code: &str) -> Result<Option<Coupon>> {
        Ok(self.state.read().await.coupons.get(code).cloned())
    }

    async fn user_exists(&self, user_id: UserId) -> Result<bool> {
        Ok(self.state.read().await.users.contains(&user_id))
    }

    async fn create_order(&self, draft: &OrderDraft) -> Result<(Order, Payment)> {
        let mut state = self.state.write().await;

        // Check every line before touching any stock.
        for line in &draft.lines {
            let variant = state
                .variants
                .get(&line.variant_id)
                .ok_or_else(|| StoreError::not_found("Variant", line.variant_id))?;
            if !variant.can_reserve(line.quantity) {
                return Err(StoreError::InsufficientStock {
                    variant_id: line.variant_id,
                    requested: line.quantity,
                    available: variant.available,
                });
            }
        }
        for line in &draft.lines {
            if let Some(variant) = state.variants.get_mut(&line.variant_id) {
                variant.available -= i64::from(line.quantity);
            }
        }

        state.last_order_id += 1;
        let order = Order {
            id: OrderId::new(state.last_order_id),
            user_id: draft.user_id,
            contact: draft.contact.clone(),
            shipping: draft.shipping.clone(),
            lines: draft.lines.clone(),
            subtotal: draft.subtotal,
            discount: draft.discount,
            shipping_fee: draft.shipping_fee,
            total: draft.total,
            status: OrderStatus::Placed,
            payment_method: draft.payment_method,
            coupon_id: draft.coupon_id,
            placed_at: draft.placed_at,
            shipped_at: None,
            cancelled_at: None,
            cancellation_reason: None,
        };
        state.orders.insert(order.id, order.clone());
        let payment = state.insert_payment(order.id, draft.payment_method, draft.placed_at);

        Ok((order, payment))
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&order_id).cloned())
    }

    async fn list_orders(&self, query: &OrderQuery) -> Result<Page<Order>> {
        let state = self.state.read().await;
        let mut matching: Vec<&Order> = state.orders.values().filter(|o| query.matches(o)).collect();
        matching.sort_by(|a, b| b.placed_at.cmp(&a.placed_at).then(b.id.cmp(&a.id)));

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.limit as usize)
            .cloned()
            .collect();

        Ok(Page::new(items, query, total))
    }

    async fn update_order_status(&self, change: &StatusChange) -> Result<Order> {
        let mut state = self.state.write().await;
        state.check_status(change.order_id, change.from)?;

        if change.marks_payment_paid
            && let Some(id) = state.latest_payment_id(change.order_id)
            && let Some(payment) = state.payments.get_mut(&id)
        {
            payment.paid = true;
            payment.paid_at.get_or_insert(change.at);
        }

        let order = state
            .orders
            .get_mut(&change.order_id)
            .ok_or_else(|| StoreError::not_found("Order", change.order_id))?;
        order.apply_status_change(change);
        Ok(order.clone())
    }

    async fn cancel_order(&self, cancellation: &Cancellation) -> Result<Order> {
        let mut state = self.state.write().await;
        state.check_status(cancellation.order_id, cancellation.from)?;

        let order = state
            .orders
            .get_mut(&cancellation.order_id)
            .ok_or_else(|| StoreError::not_found("Order", cancellation.order_id))?;
        order.apply_cancellation(cancellation);
        let order = order.clone();

        for line in &order.lines {
            if let Some(variant) = state.variants.get_mut(&line.variant_id) {
                variant.available += i64::from(line.quantity);
            }
        }

        Ok(order)
    }

    async fn latest_payment(&self, order_id: OrderId) -> Result<Option<Payment>> {
        let state = self.state.read().await;
        Ok(state
            .latest_payment_id(order_id)
            .and_then(|id| state.payments.get(&id))
            .cloned())
    }

    async fn list_payments(&self, order_id: OrderId) -> Result<Vec<Payment>> {
        Ok(self.state.read().await.payments_of(order_id))
    }

    async fn create_payment(
        &self,
        order_id: OrderId,
        method: PaymentMethod,
        at: DateTime<Utc>,
    ) -> Result<Payment> {
        let mut state = self.state.write().await;
        if !state.orders.contains_key(&order_id) {
            return Err(StoreError::not_found("Order", order_id));
        }
        Ok(state.insert_payment(order_id, method, at))
    }

    async fn apply_payment_confirmation(
        &self,
        confirmation: &PaymentConfirmation,
    ) -> Result<ConfirmationOutcome> {
        let mut state = self.state.write().await;
        let payment_id =
            state.settled_payment_id(confirmation.order_id, confirmation.payment_id)?;

        let key = (
            confirmation.method,
            confirmation.external_transaction_id.clone(),
        );
        if !state.notifications.insert(key) {
            return Ok(ConfirmationOutcome::Duplicate);
        }

        let payment = state
            .payments
            .get_mut(&payment_id)
            .ok_or_else(|| StoreError::not_found("Payment", payment_id))?;
        if payment.paid {
            return Ok(ConfirmationOutcome::AlreadyPaid(payment.clone()));
        }

        payment.method = confirmation.method;
        payment.paid = true;
        payment.external_transaction_id = Some(confirmation.external_transaction_id.clone());
        payment.paid_at = Some(confirmation.paid_at);
        payment.failure_reason = None;
        Ok(ConfirmationOutcome::Applied(payment.clone()))
    }

    async fn record_payment_failure(&self, failure: &PaymentFailure) -> Result<()> {
        let mut state = self.state.write().await;
        let payment_id = state.settled_payment_id(failure.order_id, failure.payment_id)?;

        if let Some(payment) = state.payments.get_mut(&payment_id)
            && !payment.paid
        {
            payment.failure_reason = Some(failure.reason.clone());
        }
        Ok(())
    }

    async fn mark_refunded(&self, payment_id: PaymentId, at: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.write().await;
        let payment = state
            .payments
            .get_mut(&payment_id)
            .ok_or_else(|| StoreError::not_found("Payment", payment_id))?;

        if payment.refunded_at.is_some() {
            return Ok(false);
        }
        payment.refunded_at = Some(at);
        payment.refund_started_at = None;
        Ok(true)
    }

    async fn claim_refund(
        &self,
        payment_id: PaymentId,
        at: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let payment = state
            .payments
            .get_mut(&payment_id)
            .ok_or_else(|| StoreError::not_found("Payment", payment_id))?;

        let held = payment
            .refund_started_at
            .is_some_and(|started| started >= stale_before);
        if payment.refunded_at.is_some() || held {
            return Ok(false);
        }
        payment.refund_started_at = Some(at);
        Ok(true)
    }

    async fn release_refund(&self, payment_id: PaymentId) -> Result<()> {
        let mut state = self.state.write().await;
        let payment = state
            .payments
            .get_mut(&payment_id)
            .ok_or_else(|| StoreError::not_found("Payment", payment_id))?;
        payment.refund_started_at = None;
        Ok(())
    }
}
