//! Order commands.

use common::{Money, UserId, VariantId};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::payment::PaymentMethod;

use super::{Contact, ShippingAddress};

/// One requested line of a checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRequest {
    pub variant_id: VariantId,

    /// Signed so that a negative quantity is a validation error rather than
    /// a deserialization failure.
    pub quantity: i64,

    /// Price the client saw; must match the catalog if present.
    pub unit_price: Option<Money>,
}

impl LineRequest {
    pub fn new(variant_id: VariantId, quantity: i64, unit_price: Option<Money>) -> Self {
        Self {
            variant_id,
            quantity,
            unit_price,
        }
    }
}

/// Command to place a new order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    /// Signed-in customer, or `None` for a guest checkout.
    pub user_id: Option<UserId>,
    pub contact: Contact,
    pub shipping: ShippingAddress,
    pub lines: Vec<LineRequest>,
    pub coupon_code: Option<String>,
    pub payment_method: PaymentMethod,
    pub shipping_fee: Money,
    pub declared_subtotal: Option<Money>,
    pub declared_total: Option<Money>,
}

impl PlaceOrder {
    /// Structural validation that needs no lookups.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.lines.is_empty() {
            return Err(DomainError::validation(
                "an order must contain at least one line",
            ));
        }
        for line in &self.lines {
            if line.quantity <= 0 || line.quantity > i64::from(u32::MAX) {
                return Err(DomainError::validation(format!(
                    "quantity for variant {} must be a positive integer, got {}",
                    line.variant_id, line.quantity
                )));
            }
            if line.unit_price.is_some_and(|p| p.is_negative()) {
                return Err(DomainError::validation(format!(
                    "unit price for variant {} must not be negative",
                    line.variant_id
                )));
            }
        }

        for (name, amount) in [
            ("shipping fee", Some(self.shipping_fee)),
            ("subtotal", self.declared_subtotal),
            ("total", self.declared_total),
        ] {
            if amount.is_some_and(|a| a.is_negative()) {
                return Err(DomainError::validation(format!(
                    "{name} must not be negative"
                )));
            }
        }

        if let Some(field) = self.shipping.first_missing_field() {
            return Err(DomainError::validation(format!(
                "shipping {field} is required"
            )));
        }
        if !self.contact.has_valid_phone() {
            return Err(DomainError::validation(
                "phone number must be 10 or 11 digits",
            ));
        }
        if self.user_id.is_none() && self.contact.name.trim().is_empty() {
            return Err(DomainError::validation(
                "guest checkout requires a contact name",
            ));
        }

        Ok(())
    }

    /// Distinct variant ids referenced by the request, ascending.
    pub fn variant_ids(&self) -> Vec<VariantId> {
        let mut ids: Vec<_> = self.lines.iter().map(|l| l.variant_id).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn coupon_code(&self) -> Option<&str> {
        self.coupon_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}
