//! Cancellation with stock restore, followed by a gateway refund when the
//! order was paid through a provider.
//!
//! The cancellation and stock restore commit first. A refund that fails
//! afterwards is reported as [`CheckoutError::RefundFailed`] carrying the
//! cancelled order; nothing is rolled back.
//!
//! The refunded attempt is the most recent captured one, which is not
//! necessarily the latest attempt: a late callback can settle an attempt
//! after a repayment opened a newer one. A refund claim is taken on the
//! payment before the provider is called, so concurrent cancel and refund
//! requests reach the provider at most once.

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{OrderId, PaymentId};
use domain::{Order, Payment, PaymentMethod, Principal, TransitionTable};
use order_store::OrderStore;
use payments::{GatewayError, GatewayRegistry, RefundRequest};
use serde::Serialize;

use crate::error::{CheckoutError, Result};
use crate::notify::{Notifier, OrderEvent};

/// How long a refund claim blocks other refund requests for the same payment.
const REFUND_CLAIM_MINUTES: i64 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefundSummary {
    pub payment_id: PaymentId,
    pub method: PaymentMethod,
    pub succeeded: bool,
    pub provider_message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancellationOutcome {
    pub order: Order,
    /// Present when a refund was attempted.
    pub refund: Option<RefundSummary>,
}

pub struct CancellationOrchestrator<S: OrderStore> {
    store: S,
    gateways: GatewayRegistry,
    notifier: Arc<dyn Notifier>,
    table: &'static TransitionTable,
}

impl<S: OrderStore> CancellationOrchestrator<S> {
    pub fn new(store: S, gateways: GatewayRegistry, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            gateways,
            notifier,
            table: TransitionTable::standard(),
        }
    }

    /// Cancels an order (owner or administrator) and refunds a captured
    /// gateway payment.
    #[tracing::instrument(skip(self, principal, reason, client_ip), fields(order_id = %order_id))]
    pub async fn cancel(
        &self,
        principal: &Principal,
        order_id: OrderId,
        reason: Option<String>,
        client_ip: Option<String>,
    ) -> Result<CancellationOutcome> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or_else(|| CheckoutError::not_found("Order", order_id))?;
        principal.ensure_can_manage(&order)?;

        let cancellation = order.plan_cancellation(self.table, reason, Utc::now())?;
        let cancelled = self.store.cancel_order(&cancellation).await?;

        metrics::counter!("orders_cancelled_total").increment(1);
        tracing::info!(from = %cancellation.from, "Order cancelled, stock restored");

        let refund = match self.captured_payment(order_id).await? {
            Some(payment) => {
                let reason = cancelled
                    .cancellation_reason
                    .clone()
                    .unwrap_or_else(|| format!("Order {order_id} cancelled"));
                match self.refund_payment(&cancelled, &payment, &reason, client_ip).await {
                    Ok(summary) => Some(summary),
                    Err(CheckoutError::Conflict(message)) => {
                        tracing::info!(payment_id = %payment.id, %message, "Refund left to the request holding the claim");
                        None
                    }
                    Err(err) => {
                        self.notify_cancelled(order_id, false);
                        return Err(CheckoutError::RefundFailed {
                            order: Box::new(cancelled),
                            message: err.to_string(),
                        });
                    }
                }
            }
            None => None,
        };

        if let Some(summary) = &refund
            && !summary.succeeded
        {
            self.notify_cancelled(order_id, false);
            return Err(CheckoutError::RefundFailed {
                order: Box::new(cancelled),
                message: summary.provider_message.clone(),
            });
        }

        self.notify_cancelled(order_id, refund.is_some());
        Ok(CancellationOutcome {
            order: cancelled,
            refund,
        })
    }

    /// Refunds the captured payment of an order through `gateway`. Administrators only.
    #[tracing::instrument(skip(self, principal, reason, client_ip), fields(order_id = %order_id))]
    pub async fn refund(
        &self,
        principal: &Principal,
        gateway: &str,
        order_id: OrderId,
        reason: Option<String>,
        client_ip: Option<String>,
    ) -> Result<RefundSummary> {
        principal.ensure_admin()?;
        let adapter = self
            .gateways
            .by_segment(gateway)
            .ok_or_else(|| CheckoutError::not_found("Payment gateway", gateway))?;

        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or_else(|| CheckoutError::not_found("Order", order_id))?;
        let payments = self.store.list_payments(order_id).await?;
        let payment = payments
            .iter()
            .rev()
            .find(|p| p.paid && p.method == adapter.method())
            .or_else(|| payments.last())
            .cloned()
            .ok_or_else(|| CheckoutError::not_found("Payment", order_id))?;

        if payment.method != adapter.method() {
            return Err(CheckoutError::Validation(format!(
                "order {order_id} was not paid through {gateway}"
            )));
        }
        if payment.refunded_at.is_some() {
            return Err(CheckoutError::Conflict(format!(
                "payment {} is already refunded",
                payment.id
            )));
        }
        if !payment.needs_refund() {
            return Err(CheckoutError::Validation(format!(
                "payment {} has not been captured",
                payment.id
            )));
        }

        let reason = reason
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| format!("Refund for order {order_id}"));
        let summary = self
            .refund_payment(&order, &payment, &reason, client_ip)
            .await?;
        if !summary.succeeded {
            return Err(CheckoutError::RefundFailed {
                order: Box::new(order),
                message: summary.provider_message,
            });
        }
        Ok(summary)
    }

    /// Returns the most recent attempt that still holds captured money.
    async fn captured_payment(&self, order_id: OrderId) -> Result<Option<Payment>> {
        let mut captured: Vec<Payment> = self
            .store
            .list_payments(order_id)
            .await?
            .into_iter()
            .filter(Payment::needs_refund)
            .collect();
        if captured.len() > 1 {
            tracing::warn!(
                order_id = %order_id,
                captured = captured.len(),
                "Several captured payments for one order, refunding the most recent"
            );
        }
        Ok(captured.pop())
    }

    async fn refund_payment(
        &self,
        order: &Order,
        payment: &Payment,
        reason: &str,
        client_ip: Option<String>,
    ) -> Result<RefundSummary> {
        let gateway = self.gateways.get(payment.method).ok_or_else(|| {
            GatewayError::Config(format!("no gateway registered for {}", payment.method))
        })?;
        let external_transaction_id = payment
            .external_transaction_id
            .clone()
            .ok_or_else(|| CheckoutError::Validation("payment has no transaction id".to_string()))?;

        let request = RefundRequest {
            order_id: order.id,
            payment_id: payment.id,
            amount: order.total,
            external_transaction_id,
            reason: reason.to_string(),
            transaction_date: payment.created_at,
            client_ip,
        };

        let now = Utc::now();
        let stale_before = now - Duration::minutes(REFUND_CLAIM_MINUTES);
        if !self.store.claim_refund(payment.id, now, stale_before).await? {
            return Err(CheckoutError::Conflict(format!(
                "a refund for payment {} is already in progress or done",
                payment.id
            )));
        }

        let method = payment.method.as_str();
        let outcome = match gateway.refund(&request).await {
            Ok(outcome) => outcome,
            Err(err) => {
                metrics::counter!("refunds_total", "gateway" => method, "outcome" => "error")
                    .increment(1);
                tracing::error!(payment_id = %payment.id, error = %err, "Refund call failed");
                self.release_claim(payment.id).await;
                return Err(err.into());
            }
        };

        if outcome.succeeded {
            metrics::counter!("refunds_total", "gateway" => method, "outcome" => "succeeded")
                .increment(1);
            if !self.store.mark_refunded(payment.id, Utc::now()).await? {
                tracing::warn!(payment_id = %payment.id, "Payment was already marked refunded");
            }
            tracing::info!(payment_id = %payment.id, amount = %order.total, "Payment refunded");
        } else {
            metrics::counter!("refunds_total", "gateway" => method, "outcome" => "declined")
                .increment(1);
            tracing::error!(
                payment_id = %payment.id,
                provider_message = %outcome.provider_message,
                "Refund declined by provider"
            );
            self.release_claim(payment.id).await;
        }

        Ok(RefundSummary {
            payment_id: payment.id,
            method: payment.method,
            succeeded: outcome.succeeded,
            provider_message: outcome.provider_message,
        })
    }

    async fn release_claim(&self, payment_id: PaymentId) {
        if let Err(err) = self.store.release_refund(payment_id).await {
            tracing::error!(payment_id = %payment_id, error = %err, "Failed to release refund claim");
        }
    }

    fn notify_cancelled(&self, order_id: OrderId, refunded: bool) {
        self.notifier
            .notify(OrderEvent::OrderCancelled { order_id, refunded });
    }
}
