//! Order aggregate.

use chrono::{DateTime, Utc};
use common::{CouponId, Money, OrderId, UserId};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::payment::PaymentMethod;

use super::{Contact, OrderLine, OrderStatus, ShippingAddress, TransitionTable};

/// A committed order.
///
/// Orders are only mutated through a [`StatusChange`] or a [`Cancellation`]
/// planned here and applied atomically by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,

    /// Owner, or `None` for a guest checkout.
    pub user_id: Option<UserId>,

    pub contact: Contact,
    pub shipping: ShippingAddress,
    pub lines: Vec<OrderLine>,

    pub subtotal: Money,
    pub discount: Money,
    pub shipping_fee: Money,
    pub total: Money,

    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub coupon_id: Option<CouponId>,

    pub placed_at: DateTime<Utc>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
}

/// A validated status change, ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub order_id: OrderId,
    pub from: OrderStatus,
    pub to: OrderStatus,
    /// Shipment timestamp after the change; set once and never overwritten.
    pub shipped_at: Option<DateTime<Utc>>,
    /// Delivery confirms cash-on-delivery, so the payment flips to paid.
    pub marks_payment_paid: bool,
    pub at: DateTime<Utc>,
}

impl StatusChange {
    /// Re-requesting the current status changes nothing.
    pub fn is_noop(&self) -> bool {
        self.from == self.to
    }
}

/// A validated cancellation, ready to be persisted together with the stock restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cancellation {
    pub order_id: OrderId,
    pub from: OrderStatus,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

impl Order {
    /// Returns the sum of line totals.
    pub fn lines_total(&self) -> Money {
        self.lines.iter().map(OrderLine::total_price).sum()
    }

    /// Checks `subtotal = Σ lines` and `total = subtotal − discount + shipping fee`.
    pub fn totals_are_consistent(&self) -> bool {
        self.subtotal == self.lines_total()
            && self.total == self.subtotal - self.discount + self.shipping_fee
    }

    pub fn is_guest(&self) -> bool {
        self.user_id.is_none()
    }

    /// Plans a move to `target` along `table`.
    ///
    /// Re-requesting the current status of a live order is accepted as a no-op.
    /// Entering `Shipping` stamps `shipped_at` (the supplied time, else `now`)
    /// unless it is already set.
    pub fn plan_transition(
        &self,
        table: &TransitionTable,
        target: OrderStatus,
        shipped_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<StatusChange, DomainError> {
        if target == self.status && !self.status.is_terminal() {
            return Ok(StatusChange {
                order_id: self.id,
                from: self.status,
                to: target,
                shipped_at: self.shipped_at,
                marks_payment_paid: false,
                at: now,
            });
        }

        table.check(self.status, target)?;

        let shipped_at = match (target, self.shipped_at) {
            (_, Some(existing)) => Some(existing),
            (OrderStatus::Shipping, None) => Some(shipped_at.unwrap_or(now)),
            (_, None) => None,
        };

        Ok(StatusChange {
            order_id: self.id,
            from: self.status,
            to: target,
            shipped_at,
            marks_payment_paid: target == OrderStatus::Delivered,
            at: now,
        })
    }

    /// Plans a cancellation. Delivered and already-cancelled orders are refused.
    pub fn plan_cancellation(
        &self,
        table: &TransitionTable,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Cancellation, DomainError> {
        table.check(self.status, OrderStatus::Cancelled)?;

        Ok(Cancellation {
            order_id: self.id,
            from: self.status,
            reason: reason.filter(|r| !r.trim().is_empty()),
            at: now,
        })
    }

    /// Applies a planned status change in memory.
    pub fn apply_status_change(&mut self, change: &StatusChange) {
        self.status = change.to;
        self.shipped_at = change.shipped_at;
    }

    /// Applies a planned cancellation in memory.
    pub fn apply_cancellation(&mut self, cancellation: &Cancellation) {
        self.status = OrderStatus::Cancelled;
        self.cancelled_at = Some(cancellation.at);
        self.cancellation_reason = cancellation.reason.clone();
    }
}
