//! Value objects for the order domain.

use common::{Money, VariantId};
use serde::{Deserialize, Serialize};

/// Who to contact about the order. Required for guests, copied from the
/// request for signed-in customers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Contact {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
}

impl Contact {
    /// Vietnamese mobile and landline numbers: 10 or 11 digits.
    pub fn has_valid_phone(&self) -> bool {
        let len = self.phone.len();
        (10..=11).contains(&len) && self.phone.bytes().all(|b| b.is_ascii_digit())
    }
}

/// Delivery address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ShippingAddress {
    pub street: String,
    pub ward: String,
    pub district: String,
    pub city: String,
    pub note: Option<String>,
}

impl ShippingAddress {
    /// Returns the name of the first blank mandatory field, if any.
    pub fn first_missing_field(&self) -> Option<&'static str> {
        [
            ("street", &self.street),
            ("ward", &self.ward),
            ("district", &self.district),
            ("city", &self.city),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
    }
}

/// A line of a committed order.
///
/// `unit_price` is the catalog price captured when the order was placed and
/// does not follow later catalog changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub variant_id: VariantId,
    pub quantity: u32,
    pub unit_price: Money,
}

impl OrderLine {
    pub fn new(variant_id: VariantId, quantity: u32, unit_price: Money) -> Self {
        Self {
            variant_id,
            quantity,
            unit_price,
        }
    }

    /// Returns quantity × unit price.
    pub fn total_price(&self) -> Money {
        self.unit_price.times(self.quantity)
    }
}
