//! Order Aggregate Builder: turns a validated checkout request into a priced draft.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use common::{CouponId, Money, UserId, VariantId};

use crate::catalog::Variant;
use crate::coupon::Coupon;
use crate::error::DomainError;
use crate::payment::PaymentMethod;

use super::{Contact, OrderLine, PlaceOrder, ShippingAddress};

/// A fully priced order that has not been persisted yet.
///
/// Lines are merged per variant and sorted by variant id, which is also the
/// order in which the store reserves stock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderDraft {
    pub user_id: Option<UserId>,
    pub contact: Contact,
    pub shipping: ShippingAddress,
    pub lines: Vec<OrderLine>,
    pub subtotal: Money,
    pub discount: Money,
    pub shipping_fee: Money,
    pub total: Money,
    pub payment_method: PaymentMethod,
    pub coupon_id: Option<CouponId>,
    pub placed_at: DateTime<Utc>,
}

impl OrderDraft {
    /// Prices `request` against catalog `variants` and an optional `coupon`.
    ///
    /// The catalog price is captured on every line; a declared unit price or
    /// declared totals that disagree with the computed ones are rejected.
    pub fn build(
        request: &PlaceOrder,
        variants: &HashMap<VariantId, Variant>,
        coupon: Option<&Coupon>,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        request.validate()?;

        let mut quantities: BTreeMap<VariantId, u32> = BTreeMap::new();
        for line in &request.lines {
            let variant = variants
                .get(&line.variant_id)
                .ok_or_else(|| DomainError::not_found("Variant", line.variant_id))?;

            if let Some(declared) = line.unit_price
                && declared != variant.price
            {
                return Err(DomainError::validation(format!(
                    "price of variant {} changed: declared {}, current {}",
                    variant.id, declared, variant.price
                )));
            }

            let quantity = u32::try_from(line.quantity).map_err(|_| {
                DomainError::validation(format!("invalid quantity {}", line.quantity))
            })?;
            let entry = quantities.entry(line.variant_id).or_default();
            *entry = entry.checked_add(quantity).ok_or_else(|| {
                DomainError::validation(format!("quantity overflow for variant {}", line.variant_id))
            })?;
        }

        let lines: Vec<OrderLine> = quantities
            .into_iter()
            .map(|(variant_id, quantity)| {
                OrderLine::new(variant_id, quantity, variants[&variant_id].price)
            })
            .collect();

        let subtotal: Money = lines.iter().map(OrderLine::total_price).sum();
        let discount = match coupon {
            Some(c) => c.discount_for(subtotal, now)?,
            None => Money::zero(),
        };
        let total = subtotal - discount + request.shipping_fee;

        if let Some(declared) = request.declared_subtotal
            && declared != subtotal
        {
            return Err(DomainError::validation(format!(
                "declared subtotal {declared} does not match computed subtotal {subtotal}"
            )));
        }
        if let Some(declared) = request.declared_total
            && declared != total
        {
            return Err(DomainError::validation(format!(
                "declared total {declared} does not match computed total {total}"
            )));
        }

        Ok(Self {
            user_id: request.user_id,
            contact: request.contact.clone(),
            shipping: request.shipping.clone(),
            lines,
            subtotal,
            discount,
            shipping_fee: request.shipping_fee,
            total,
            payment_method: request.payment_method,
            coupon_id: coupon.map(|c| c.id),
            placed_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coupon::DiscountKind;
    use crate::order::LineRequest;
    use chrono::Duration;

    fn catalog() -> HashMap<VariantId, Variant> {
        [
            Variant::new(VariantId::new(10), 1, 5, Money::new(50_000)),
            Variant::new(VariantId::new(11), 2, 5, Money::new(120_000)),
        ]
        .into_iter()
        .map(|v| (v.id, v))
        .collect()
    }

    fn request(lines: Vec<LineRequest>) -> PlaceOrder {
        PlaceOrder {
            user_id: Some(UserId::new(1)),
            contact: Contact {
                name: "Binh".to_string(),
                phone: "0901234567".to_string(),
                email: None,
            },
            shipping: ShippingAddress {
                street: "1 Nguyen Hue".to_string(),
                ward: "Ben Nghe".to_string(),
                district: "1".to_string(),
                city: "HCMC".to_string(),
                note: None,
            },
            lines,
            coupon_code: None,
            payment_method: PaymentMethod::CashOnDelivery,
            shipping_fee: Money::new(20_000),
            declared_subtotal: None,
            declared_total: None,
        }
    }

    fn two_lines() -> Vec<LineRequest> {
        vec![
            LineRequest::new(VariantId::new(10), 2, Some(Money::new(50_000))),
            LineRequest::new(VariantId::new(11), 1, Some(Money::new(120_000))),
        ]
    }

    #[test]
    fn test_two_line_order_total() {
        let draft = OrderDraft::build(&request(two_lines()), &catalog(), None, Utc::now()).unwrap();
        assert_eq!(draft.subtotal, Money::new(220_000));
        assert_eq!(draft.discount, Money::zero());
        assert_eq!(draft.total, Money::new(240_000));
        assert_eq!(draft.lines.len(), 2);
    }

    #[test]
    fn test_duplicate_variants_are_merged() {
        let lines = vec![
            LineRequest::new(VariantId::new(11), 1, None),
            LineRequest::new(VariantId::new(10), 1, None),
            LineRequest::new(VariantId::new(10), 2, None),
        ];
        let draft = OrderDraft::build(&request(lines), &catalog(), None, Utc::now()).unwrap();
        assert_eq!(
            draft.lines,
            vec![
                OrderLine::new(VariantId::new(10), 3, Money::new(50_000)),
                OrderLine::new(VariantId::new(11), 1, Money::new(120_000)),
            ]
        );
    }

    #[test]
    fn test_unknown_variant_is_not_found() {
        let lines = vec![LineRequest::new(VariantId::new(99), 1, None)];
        let err = OrderDraft::build(&request(lines), &catalog(), None, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::NotFound { entity: "Variant", .. }));
    }

    #[test]
    fn test_stale_price_is_rejected() {
        let lines = vec![LineRequest::new(VariantId::new(10), 1, Some(Money::new(1)))];
        let err = OrderDraft::build(&request(lines), &catalog(), None, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn test_non_positive_quantity_is_rejected() {
        for qty in [0, -1] {
            let lines = vec![LineRequest::new(VariantId::new(10), qty, None)];
            let err =
                OrderDraft::build(&request(lines), &catalog(), None, Utc::now()).unwrap_err();
            assert!(matches!(err, DomainError::Validation(_)));
        }
    }

    #[test]
    fn test_empty_order_is_rejected() {
        let err = OrderDraft::build(&request(vec![]), &catalog(), None, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn test_negative_shipping_fee_is_rejected() {
        let mut req = request(two_lines());
        req.shipping_fee = Money::new(-1);
        assert!(OrderDraft::build(&req, &catalog(), None, Utc::now()).is_err());
    }

    #[test]
    fn test_declared_totals_must_match() {
        let mut req = request(two_lines());
        req.declared_subtotal = Some(Money::new(220_000));
        req.declared_total = Some(Money::new(240_000));
        assert!(OrderDraft::build(&req, &catalog(), None, Utc::now()).is_ok());

        req.declared_total = Some(Money::new(200_000));
        assert!(OrderDraft::build(&req, &catalog(), None, Utc::now()).is_err());
    }

    #[test]
    fn test_coupon_discount_is_applied() {
        let now = Utc::now();
        let coupon = Coupon {
            id: CouponId::new(3),
            code: "TET10".to_string(),
            kind: DiscountKind::Percentage,
            value: 10,
            max_discount: Some(Money::new(15_000)),
            min_order_value: Money::new(100_000),
            starts_at: now - Duration::days(1),
            ends_at: now + Duration::days(1),
        };
        let draft = OrderDraft::build(&request(two_lines()), &catalog(), Some(&coupon), now).unwrap();
        assert_eq!(draft.discount, Money::new(15_000));
        assert_eq!(draft.total, Money::new(225_000));
        assert_eq!(draft.coupon_id, Some(CouponId::new(3)));
    }

    #[test]
    fn test_guest_requires_name() {
        let mut req = request(two_lines());
        req.user_id = None;
        req.contact.name = String::new();
        assert!(OrderDraft::build(&req, &catalog(), None, Utc::now()).is_err());
    }
}
