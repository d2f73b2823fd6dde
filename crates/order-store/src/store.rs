use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, PaymentId, UserId, VariantId};
use domain::{
    Cancellation, Coupon, Order, OrderDraft, Payment, PaymentConfirmation, PaymentFailure,
    PaymentMethod, StatusChange, Variant,
};

use crate::{OrderQuery, Page, Result};

/// What happened when a gateway confirmation was applied to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    /// First delivery of this transaction; the settled attempt is now paid.
    Applied(Payment),

    /// `(provider, external transaction id)` was already recorded; nothing changed.
    Duplicate,

    /// New transaction id, but the attempt was already paid by another
    /// transaction. Recorded for follow-up, payment left unchanged.
    AlreadyPaid(Payment),
}

impl ConfirmationOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ConfirmationOutcome::Applied(_))
    }
}

/// Persistence for orders, stock and the payment ledger.
///
/// Every method that touches more than one row is atomic: it either commits
/// all of its writes or none. All implementations must be thread-safe.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Loads the requested variants. Unknown ids are simply absent from the map.
    async fn get_variants(&self, ids: &[VariantId]) -> Result<HashMap<VariantId, Variant>>;

    /// Looks a coupon up by its customer-facing code.
    async fn get_coupon_by_code(&self, code: &str) -> Result<Option<Coupon>>;

    async fn user_exists(&self, user_id: UserId) -> Result<bool>;

    /// Reserves stock for every draft line and persists the order with a
    /// pending payment, all in one unit.
    ///
    /// Lines are reserved in ascending variant id order with a conditional
    /// decrement. If any line is short, nothing is written and
    /// `InsufficientStock` names that line.
    async fn create_order(&self, draft: &OrderDraft) -> Result<(Order, Payment)>;

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Lists orders matching `query`, newest first.
    async fn list_orders(&self, query: &OrderQuery) -> Result<Page<Order>>;

    /// Applies a status change if the order is still in `change.from`.
    ///
    /// When `change.marks_payment_paid` is set, the latest payment is marked
    /// paid in the same unit.
    async fn update_order_status(&self, change: &StatusChange) -> Result<Order>;

    /// Cancels the order if it is still in `cancellation.from` and restores
    /// every line's quantity to its variant, in one unit.
    async fn cancel_order(&self, cancellation: &Cancellation) -> Result<Order>;

    /// Returns the latest payment attempt (highest id) for the order.
    async fn latest_payment(&self, order_id: OrderId) -> Result<Option<Payment>>;

    /// Returns every payment attempt for the order, oldest first.
    async fn list_payments(&self, order_id: OrderId) -> Result<Vec<Payment>>;

    /// Opens a new unpaid payment attempt for the order.
    async fn create_payment(
        &self,
        order_id: OrderId,
        method: PaymentMethod,
        at: DateTime<Utc>,
    ) -> Result<Payment>;

    /// Records the notification key and marks the attempt paid, in one unit.
    ///
    /// The attempt is `confirmation.payment_id`, or the latest one when the
    /// provider reference carried no attempt. An attempt that does not belong
    /// to the order is `NotFound`.
    async fn apply_payment_confirmation(
        &self,
        confirmation: &PaymentConfirmation,
    ) -> Result<ConfirmationOutcome>;

    /// Stores the provider's failure reason on the named attempt (latest when
    /// unnamed) unless it is already paid.
    async fn record_payment_failure(&self, failure: &PaymentFailure) -> Result<()>;

    /// Claims the payment for an outbound refund request.
    ///
    /// Succeeds only if the payment is not refunded and no other claim newer
    /// than `stale_before` is held. Returns false when the claim is refused.
    async fn claim_refund(
        &self,
        payment_id: PaymentId,
        at: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool>;

    /// Drops a refund claim after the provider declined or the call failed.
    async fn release_refund(&self, payment_id: PaymentId) -> Result<()>;

    /// Stamps `refunded_at` and drops the claim, unless already refunded.
    /// Returns false if it was.
    async fn mark_refunded(&self, payment_id: PaymentId, at: DateTime<Utc>) -> Result<bool>;
}
