//! Gateway return and IPN handling.
//!
//! Every callback is verified by its adapter before anything is read from it.
//! A successful confirmation is applied through the ledger's dedupe table, so
//! a redelivered notification changes nothing and notifies no one.

use std::sync::Arc;

use chrono::Utc;
use common::{OrderId, PaymentId};
use domain::{Order, PaymentConfirmation, PaymentFailure};
use order_store::{ConfirmationOutcome, OrderStore};
use payments::{CallbackParams, GatewayRegistry, PaymentGateway, Verification};
use serde_json::Value;

use crate::error::{CheckoutError, Result};
use crate::notify::{Notifier, OrderEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    /// Browser redirect back from the provider.
    Return,
    /// Server-to-server notification.
    Ipn,
}

impl CallbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackKind::Return => "return",
            CallbackKind::Ipn => "ipn",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// The latest payment was marked paid by this callback.
    Paid {
        order_id: OrderId,
        payment_id: PaymentId,
    },
    /// The transaction was already recorded; nothing changed.
    AlreadyProcessed { order_id: OrderId },
    /// The provider reported a failure, or the amount did not match.
    Failed { order_id: OrderId, reason: String },
}

impl CallbackOutcome {
    pub fn order_id(&self) -> OrderId {
        match self {
            CallbackOutcome::Paid { order_id, .. }
            | CallbackOutcome::AlreadyProcessed { order_id }
            | CallbackOutcome::Failed { order_id, .. } => *order_id,
        }
    }

    /// True when the order is paid after this callback.
    pub fn is_paid(&self) -> bool {
        matches!(
            self,
            CallbackOutcome::Paid { .. } | CallbackOutcome::AlreadyProcessed { .. }
        )
    }

    fn label(&self) -> &'static str {
        match self {
            CallbackOutcome::Paid { .. } => "paid",
            CallbackOutcome::AlreadyProcessed { .. } => "duplicate",
            CallbackOutcome::Failed { .. } => "failed",
        }
    }
}

pub struct PaymentCallbackProcessor<S: OrderStore> {
    store: S,
    gateways: GatewayRegistry,
    notifier: Arc<dyn Notifier>,
}

impl<S: OrderStore> PaymentCallbackProcessor<S> {
    pub fn new(store: S, gateways: GatewayRegistry, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            gateways,
            notifier,
        }
    }

    /// Processes a browser return. The caller redirects based on the outcome.
    pub async fn handle_return(
        &self,
        gateway: &str,
        params: &CallbackParams,
    ) -> Result<CallbackOutcome> {
        let adapter = self.gateway(gateway)?;
        self.process(adapter.as_ref(), CallbackKind::Return, params).await
    }

    /// Processes an IPN and returns the acknowledgement body for the provider.
    ///
    /// Only an unknown gateway is an error. Everything else is acknowledged;
    /// processing failures are logged for follow-up.
    pub async fn handle_ipn(&self, gateway: &str, params: &CallbackParams) -> Result<Value> {
        let adapter = self.gateway(gateway)?;
        match self.process(adapter.as_ref(), CallbackKind::Ipn, params).await {
            Ok(_) | Err(CheckoutError::Signature { .. }) => {}
            Err(err) => {
                tracing::error!(gateway, error = %err, "IPN processing failed");
            }
        }
        Ok(adapter.ipn_ack())
    }

    fn gateway(&self, segment: &str) -> Result<Arc<dyn PaymentGateway>> {
        self.gateways
            .by_segment(segment)
            .ok_or_else(|| CheckoutError::not_found("Payment gateway", segment))
    }

    #[tracing::instrument(skip(self, gateway, params), fields(gateway = %gateway.method(), kind = kind.as_str()))]
    async fn process(
        &self,
        gateway: &dyn PaymentGateway,
        kind: CallbackKind,
        params: &CallbackParams,
    ) -> Result<CallbackOutcome> {
        let method = gateway.method();
        let verification = match kind {
            CallbackKind::Return => gateway.verify_return(params),
            CallbackKind::Ipn => gateway.verify_ipn(params),
        };

        let Some(order_id) = verification.order_id.filter(|_| verification.valid) else {
            tracing::warn!("Callback signature verification failed");
            metrics::counter!("payment_signature_rejections_total", "gateway" => method.as_str())
                .increment(1);
            metrics::counter!(
                "payment_callbacks_total",
                "gateway" => method.as_str(),
                "kind" => kind.as_str(),
                "outcome" => "invalid_signature"
            )
            .increment(1);
            return Err(CheckoutError::Signature {
                gateway: method.to_string(),
            });
        };

        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or_else(|| CheckoutError::not_found("Order", order_id))?;

        let outcome = if verification.succeeded {
            self.confirm(&order, &verification, gateway).await?
        } else {
            let reason = verification
                .message
                .clone()
                .filter(|m| !m.is_empty())
                .or_else(|| verification.result_code.clone())
                .unwrap_or_else(|| "payment failed".to_string());
            self.fail(&order, verification.payment_id, gateway, reason).await?
        };

        metrics::counter!(
            "payment_callbacks_total",
            "gateway" => method.as_str(),
            "kind" => kind.as_str(),
            "outcome" => outcome.label()
        )
        .increment(1);
        Ok(outcome)
    }

    async fn confirm(
        &self,
        order: &Order,
        verification: &Verification,
        gateway: &dyn PaymentGateway,
    ) -> Result<CallbackOutcome> {
        if let Some(amount) = verification.amount
            && amount != order.total
        {
            tracing::warn!(order_id = %order.id, paid = %amount, expected = %order.total, "Paid amount does not match order total");
            let reason = format!("amount mismatch: paid {amount}, expected {}", order.total);
            return self
                .fail(order, verification.payment_id, gateway, reason)
                .await;
        }

        let external_transaction_id = verification
            .external_transaction_id
            .clone()
            .ok_or_else(|| CheckoutError::Signature {
                gateway: gateway.method().to_string(),
            })?;

        let confirmation = PaymentConfirmation {
            order_id: order.id,
            payment_id: verification.payment_id,
            method: gateway.method(),
            external_transaction_id: external_transaction_id.clone(),
            paid_at: Utc::now(),
        };

        match self.store.apply_payment_confirmation(&confirmation).await? {
            ConfirmationOutcome::Applied(payment) => {
                tracing::info!(order_id = %order.id, payment_id = %payment.id, "Payment confirmed");
                if order.status == domain::OrderStatus::Cancelled {
                    tracing::warn!(order_id = %order.id, "Payment captured for a cancelled order");
                }
                self.notifier.notify(OrderEvent::PaymentConfirmed {
                    order_id: order.id,
                    payment_id: payment.id,
                    method: payment.method,
                    external_transaction_id,
                });
                Ok(CallbackOutcome::Paid {
                    order_id: order.id,
                    payment_id: payment.id,
                })
            }
            ConfirmationOutcome::Duplicate => {
                tracing::debug!(order_id = %order.id, "Duplicate payment notification");
                Ok(CallbackOutcome::AlreadyProcessed { order_id: order.id })
            }
            ConfirmationOutcome::AlreadyPaid(payment) => {
                tracing::warn!(
                    order_id = %order.id,
                    payment_id = %payment.id,
                    transaction = %external_transaction_id,
                    "Second transaction for an already paid payment"
                );
                Ok(CallbackOutcome::AlreadyProcessed { order_id: order.id })
            }
        }
    }

    async fn fail(
        &self,
        order: &Order,
        payment_id: Option<PaymentId>,
        gateway: &dyn PaymentGateway,
        reason: String,
    ) -> Result<CallbackOutcome> {
        self.store
            .record_payment_failure(&PaymentFailure {
                order_id: order.id,
                payment_id,
                method: gateway.method(),
                reason: reason.clone(),
            })
            .await?;
        tracing::info!(order_id = %order.id, reason = %reason, "Payment not completed");
        Ok(CallbackOutcome::Failed {
            order_id: order.id,
            reason,
        })
    }
}
