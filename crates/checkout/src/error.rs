//! Checkout error types.

use common::VariantId;
use domain::{DomainError, Order, OrderStatus};
use order_store::StoreError;
use payments::GatewayError;
use thiserror::Error;

/// Errors surfaced by the checkout services.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// Malformed request or violated business rule.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A referenced order, variant, coupon, user or payment does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Stock ran out for a line; nothing was reserved.
    #[error(
        "Insufficient stock for variant {variant_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        variant_id: VariantId,
        requested: u32,
        available: i64,
    },

    /// Concurrent modification or duplicate resource.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid status transition: cannot move order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// A gateway callback failed signature verification.
    #[error("Invalid {gateway} callback signature")]
    Signature { gateway: String },

    /// The payment provider failed or timed out.
    #[error("Payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// The order was cancelled and its stock restored, but the refund did not go through.
    #[error("Order {} was cancelled but the refund failed: {message}", order.id)]
    RefundFailed { order: Box<Order>, message: String },

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl From<DomainError> for CheckoutError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) => CheckoutError::Validation(msg),
            DomainError::NotFound { entity, id } => CheckoutError::NotFound { entity, id },
            DomainError::InvalidTransition { from, to } => {
                CheckoutError::InvalidTransition { from, to }
            }
            DomainError::Forbidden(msg) => CheckoutError::Forbidden(msg),
        }
    }
}

impl From<StoreError> for CheckoutError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InsufficientStock {
                variant_id,
                requested,
                available,
            } => CheckoutError::InsufficientStock {
                variant_id,
                requested,
                available,
            },
            StoreError::NotFound { entity, id } => CheckoutError::NotFound { entity, id },
            conflict @ StoreError::StatusConflict { .. } => {
                CheckoutError::Conflict(conflict.to_string())
            }
            other => CheckoutError::Store(other),
        }
    }
}

impl CheckoutError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        CheckoutError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Convenience type alias for checkout results.
pub type Result<T> = std::result::Result<T, CheckoutError>;

#[cfg(test)]
mod tests {
    use super::*;
    use common::OrderId;

    #[test]
    fn store_errors_map_onto_the_taxonomy() {
        let err: CheckoutError = StoreError::InsufficientStock {
            variant_id: VariantId::new(10),
            requested: 2,
            available: 1,
        }
        .into();
        assert!(matches!(err, CheckoutError::InsufficientStock { requested: 2, .. }));

        let err: CheckoutError = StoreError::StatusConflict {
            order_id: OrderId::new(1),
            expected: OrderStatus::Placed,
            actual: OrderStatus::Cancelled,
        }
        .into();
        assert!(matches!(err, CheckoutError::Conflict(_)));

        let err: CheckoutError = StoreError::not_found("Order", 9).into();
        assert!(matches!(err, CheckoutError::NotFound { entity: "Order", .. }));
    }

    #[test]
    fn domain_errors_keep_their_kind() {
        let err: CheckoutError = DomainError::InvalidTransition {
            from: OrderStatus::Delivered,
            to: OrderStatus::Processing,
        }
        .into();
        assert!(matches!(err, CheckoutError::InvalidTransition { .. }));
    }
}
