//! Integration tests for checkout pricing and the order lifecycle.
//!
//! These tests drive the public API the way the checkout coordinator does:
//! build a draft, materialize it as an order, then walk it through statuses.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use common::{CouponId, Money, OrderId, UserId, VariantId};
use domain::{
    Contact, Coupon, DiscountKind, DomainError, LineRequest, Order, OrderDraft, OrderStatus,
    PaymentMethod, PlaceOrder, Principal, ShippingAddress, TransitionTable, Variant,
};

fn catalog() -> HashMap<VariantId, Variant> {
    [
        Variant::new(VariantId::new(1), 100, 3, Money::new(50_000)),
        Variant::new(VariantId::new(2), 100, 3, Money::new(120_000)),
        Variant::new(VariantId::new(3), 200, 0, Money::new(75_000)),
    ]
    .into_iter()
    .map(|v| (v.id, v))
    .collect()
}

fn checkout(user: Option<i64>, lines: Vec<LineRequest>) -> PlaceOrder {
    PlaceOrder {
        user_id: user.map(UserId::new),
        contact: Contact {
            name: "Tran Thi B".to_string(),
            phone: "0912345678".to_string(),
            email: Some("b@example.com".to_string()),
        },
        shipping: ShippingAddress {
            street: "5 Hai Ba Trung".to_string(),
            ward: "Trang Tien".to_string(),
            district: "Hoan Kiem".to_string(),
            city: "Ha Noi".to_string(),
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

fn materialize(draft: OrderDraft, id: i64) -> Order {
    Order {
        id: OrderId::new(id),
        user_id: draft.user_id,
        contact: draft.contact,
        shipping: draft.shipping,
        lines: draft.lines,
        subtotal: draft.subtotal,
        discount: draft.discount,
        shipping_fee: draft.shipping_fee,
        total: draft.total,
        status: OrderStatus::Placed,
        payment_method: draft.payment_method,
        coupon_id: draft.coupon_id,
        placed_at: draft.placed_at,
        shipped_at: None,
        cancelled_at: None,
        cancellation_reason: None,
    }
}

mod pricing {
    use super::*;

    #[test]
    fn draft_totals_are_consistent() {
        let req = checkout(
            Some(1),
            vec![
                LineRequest::new(VariantId::new(1), 2, Some(Money::new(50_000))),
                LineRequest::new(VariantId::new(2), 1, Some(Money::new(120_000))),
            ],
        );
        let draft = OrderDraft::build(&req, &catalog(), None, Utc::now()).unwrap();
        let order = materialize(draft, 1);

        assert_eq!(order.total, Money::new(240_000));
        assert!(order.totals_are_consistent());
    }

    #[test]
    fn fixed_coupon_reduces_total() {
        let now = Utc::now();
        let coupon = Coupon {
            id: CouponId::new(9),
            code: "GIAM30K".to_string(),
            kind: DiscountKind::FixedAmount,
            value: 30_000,
            max_discount: None,
            min_order_value: Money::new(50_000),
            starts_at: now - Duration::hours(1),
            ends_at: now + Duration::hours(1),
        };
        let req = checkout(None, vec![LineRequest::new(VariantId::new(2), 1, None)]);
        let draft = OrderDraft::build(&req, &catalog(), Some(&coupon), now).unwrap();

        assert_eq!(draft.discount, Money::new(30_000));
        assert_eq!(draft.total, Money::new(110_000));
        assert!(materialize(draft, 2).is_guest());
    }

    #[test]
    fn expired_coupon_is_rejected() {
        let now = Utc::now();
        let coupon = Coupon {
            id: CouponId::new(9),
            code: "OLD".to_string(),
            kind: DiscountKind::FixedAmount,
            value: 10_000,
            max_discount: None,
            min_order_value: Money::zero(),
            starts_at: now - Duration::days(10),
            ends_at: now - Duration::days(1),
        };
        let req = checkout(Some(1), vec![LineRequest::new(VariantId::new(1), 1, None)]);
        let err = OrderDraft::build(&req, &catalog(), Some(&coupon), now).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn guest_with_bad_phone_is_rejected() {
        let mut req = checkout(None, vec![LineRequest::new(VariantId::new(1), 1, None)]);
        req.contact.phone = "12345".to_string();
        let err = OrderDraft::build(&req, &catalog(), None, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }
}

mod lifecycle {
    use super::*;

    fn placed_order() -> Order {
        let req = checkout(Some(1), vec![LineRequest::new(VariantId::new(1), 1, None)]);
        materialize(
            OrderDraft::build(&req, &catalog(), None, Utc::now()).unwrap(),
            10,
        )
    }

    #[test]
    fn placed_to_delivered_walk() {
        let table = TransitionTable::standard();
        let mut order = placed_order();

        for target in [
            OrderStatus::Processing,
            OrderStatus::Shipping,
            OrderStatus::Delivered,
        ] {
            let change = order
                .plan_transition(table, target, None, Utc::now())
                .unwrap();
            order.apply_status_change(&change);
            assert_eq!(order.status, target);
        }

        assert!(order.shipped_at.is_some());
        assert!(order.plan_cancellation(table, None, Utc::now()).is_err());
    }

    #[test]
    fn cancelled_order_is_final() {
        let table = TransitionTable::standard();
        let mut order = placed_order();
        let cancellation = order
            .plan_cancellation(table, Some("changed my mind".to_string()), Utc::now())
            .unwrap();
        order.apply_cancellation(&cancellation);

        for target in OrderStatus::ALL {
            assert!(order.plan_transition(table, target, None, Utc::now()).is_err());
        }
    }

    #[test]
    fn only_owner_or_admin_may_manage() {
        let order = placed_order();
        assert!(Principal::customer(UserId::new(1)).ensure_can_manage(&order).is_ok());
        assert!(Principal::admin(UserId::new(99)).ensure_can_manage(&order).is_ok());

        let err = Principal::customer(UserId::new(2))
            .ensure_can_manage(&order)
            .unwrap_err();
        assert!(matches!(err, DomainError::Forbidden(_)));
    }
}
