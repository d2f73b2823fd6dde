//! The opaque per-attempt reference handed to providers.
//!
//! Format: `"{order_id}_{payment_id}"`. Providers echo it back in returns and
//! IPNs, which is how a callback finds its order.

use common::{OrderId, PaymentId};

pub fn build(order_id: OrderId, payment_id: PaymentId) -> String {
    format!("{order_id}_{payment_id}")
}

/// Splits a reference into the order id and, when present, the payment
/// attempt. A bare order id without suffix is accepted too.
pub fn parse(reference: &str) -> Option<(OrderId, Option<PaymentId>)> {
    let (order, payment) = match reference.split_once('_') {
        Some((order, payment)) => (order, Some(payment)),
        None => (reference, None),
    };
    let order_id = order.parse().ok()?;
    let payment_id = match payment {
        Some(raw) => Some(raw.parse().ok()?),
        None => None,
    };
    Some((order_id, payment_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_and_parse() {
        let reference = build(OrderId::new(42), PaymentId::new(7));
        assert_eq!(reference, "42_7");
        assert_eq!(
            parse(&reference),
            Some((OrderId::new(42), Some(PaymentId::new(7))))
        );
        assert_eq!(parse("42"), Some((OrderId::new(42), None)));
    }

    #[test]
    fn garbage_is_rejected() {
        assert_eq!(parse(""), None);
        assert_eq!(parse("abc_1"), None);
        assert_eq!(parse("-3_1"), None);
        assert_eq!(parse("_1"), None);
        assert_eq!(parse("42_x"), None);
        assert_eq!(parse("42_0"), None);
    }
}
