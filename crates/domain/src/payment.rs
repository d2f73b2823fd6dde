//! Payment ledger records.

use chrono::{DateTime, Utc};
use common::{OrderId, PaymentId};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// How the customer pays for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PaymentMethod {
    /// MoMo e-wallet redirect gateway.
    #[serde(rename = "momo")]
    Momo,
    /// VNPay card/bank redirect gateway.
    #[serde(rename = "vnpay")]
    Vnpay,
    /// Paid to the courier; confirmed when the order is delivered.
    #[default]
    #[serde(rename = "cod", alias = "cash_on_delivery")]
    CashOnDelivery,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Momo => "momo",
            PaymentMethod::Vnpay => "vnpay",
            PaymentMethod::CashOnDelivery => "cod",
        }
    }

    /// Returns true if the money is collected by an external gateway.
    pub fn is_gateway(&self) -> bool {
        matches!(self, PaymentMethod::Momo | PaymentMethod::Vnpay)
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "momo" => Ok(PaymentMethod::Momo),
            "vnpay" => Ok(PaymentMethod::Vnpay),
            "cod" | "cash_on_delivery" => Ok(PaymentMethod::CashOnDelivery),
            other => Err(DomainError::validation(format!(
                "unknown payment method: {other}"
            ))),
        }
    }
}

/// One payment attempt for an order.
///
/// An order may accumulate several attempts (repayment after a failed
/// gateway round-trip). Callbacks name the attempt they settle, so an
/// older attempt can still end up paid after a newer one was opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub method: PaymentMethod,
    pub paid: bool,
    pub external_transaction_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    /// Last failure reported by the provider; cleared once paid.
    pub failure_reason: Option<String>,
    pub refunded_at: Option<DateTime<Utc>>,
    /// Set while a refund request is in flight with the provider.
    pub refund_started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    /// Returns true if cancelling the order should trigger a gateway refund.
    pub fn needs_refund(&self) -> bool {
        self.method.is_gateway()
            && self.paid
            && self.external_transaction_id.is_some()
            && self.refunded_at.is_none()
    }
}

/// A verified "this order was paid" signal from a gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentConfirmation {
    pub order_id: OrderId,
    /// Attempt being settled; `None` settles the latest one.
    pub payment_id: Option<PaymentId>,
    pub method: PaymentMethod,
    pub external_transaction_id: String,
    pub paid_at: DateTime<Utc>,
}

/// A verified "the customer did not pay" signal from a gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentFailure {
    pub order_id: OrderId,
    pub payment_id: Option<PaymentId>,
    pub method: PaymentMethod,
    pub reason: String,
}
