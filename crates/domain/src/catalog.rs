//! Catalog data the order core reads and reserves against.

use common::{Money, VariantId};
use serde::{Deserialize, Serialize};

/// A purchasable SKU with its own stock count and price.
///
/// `available` never goes negative; it only changes through a reservation
/// or a cancellation restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub id: VariantId,
    pub product_id: i64,
    pub available: i64,
    pub price: Money,
}

impl Variant {
    pub fn new(id: VariantId, product_id: i64, available: i64, price: Money) -> Self {
        Self {
            id,
            product_id,
            available,
            price,
        }
    }

    /// Returns true if `quantity` units can be reserved right now.
    pub fn can_reserve(&self, quantity: u32) -> bool {
        self.available >= i64::from(quantity)
    }
}
