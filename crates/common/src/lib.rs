//! Shared vocabulary used by every layer of the order and payment services.

pub mod money;
pub mod types;

pub use money::Money;
pub use types::{CouponId, OrderId, ParseIdError, PaymentId, UserId, VariantId};
