//! Coupons as seen by the order core: read-only, referenced, never owned.

use chrono::{DateTime, Utc};
use common::{CouponId, Money};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// How a coupon's `value` is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountKind {
    /// `value` is an amount of money.
    FixedAmount,
    /// `value` is a percentage of the subtotal.
    Percentage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    pub id: CouponId,
    pub code: String,
    pub kind: DiscountKind,
    pub value: i64,
    /// Upper bound on the discount, whatever the kind.
    pub max_discount: Option<Money>,
    pub min_order_value: Money,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl Coupon {
    /// Returns true if `now` falls inside the validity window (inclusive).
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.starts_at <= now && now <= self.ends_at
    }

    /// Computes the discount this coupon grants on `subtotal`.
    ///
    /// Percentages are clamped to 0..=100, the result is capped at
    /// `max_discount` and never exceeds the subtotal itself.
    pub fn discount_for(&self, subtotal: Money, now: DateTime<Utc>) -> Result<Money, DomainError> {
        if !self.is_active_at(now) {
            return Err(DomainError::validation(format!(
                "coupon {} is expired or not yet valid",
                self.code
            )));
        }
        if subtotal < self.min_order_value {
            return Err(DomainError::validation(format!(
                "order subtotal {} is below the minimum {} required by coupon {}",
                subtotal, self.min_order_value, self.code
            )));
        }

        let raw = match self.kind {
            DiscountKind::Percentage => subtotal.percent(self.value.clamp(0, 100)),
            DiscountKind::FixedAmount => Money::new(self.value.max(0)),
        };
        let capped = match self.max_discount {
            Some(cap) => raw.min(cap),
            None => raw,
        };
        Ok(capped.min(subtotal))
    }
}
