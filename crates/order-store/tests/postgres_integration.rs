//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container and need Docker.
//! Run with:
//!
//! ```bash
//! cargo test -p order-store --test postgres_integration -- --ignored --test-threads=1
//! ```

use std::sync::Arc;

use chrono::Utc;
use common::{Money, OrderId, VariantId};
use domain::{
    Cancellation, Contact, OrderDraft, OrderLine, OrderStatus, PaymentConfirmation, PaymentMethod,
    ShippingAddress, TransitionTable,
};
use order_store::{ConfirmationOutcome, OrderQuery, OrderStore, PostgresOrderStore, StoreError};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            for migration in [
                include_str!("../../../migrations/001_create_order_schema.sql"),
                include_str!("../../../migrations/002_add_refund_claim.sql"),
            ] {
                sqlx::raw_sql(migration).execute(&temp_pool).await.unwrap();
            }
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Fresh store with cleared tables and two seeded variants (ids 10 and 11, 5 units each).
async fn get_test_store() -> PostgresOrderStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query(
        "TRUNCATE TABLE payment_notifications, payments, order_lines, orders, coupons, product_variants, users RESTART IDENTITY CASCADE",
    )
    .execute(&pool)
    .await
    .unwrap();

    sqlx::query(
        "INSERT INTO product_variants (id, product_id, price, available) VALUES (10, 1, 50000, 5), (11, 1, 120000, 5)",
    )
    .execute(&pool)
    .await
    .unwrap();

    PostgresOrderStore::new(pool)
}

fn draft(lines: &[(i64, u32, i64)], method: PaymentMethod) -> OrderDraft {
    let lines: Vec<_> = lines
        .iter()
        .map(|&(v, q, p)| OrderLine::new(VariantId::new(v), q, Money::new(p)))
        .collect();
    let subtotal = lines.iter().map(OrderLine::total_price).sum();
    OrderDraft {
        user_id: None,
        contact: Contact {
            name: "Le Van C".to_string(),
            phone: "0987654321".to_string(),
            email: None,
        },
        shipping: ShippingAddress {
            street: "9 Tran Phu".to_string(),
            ward: "Loc Tho".to_string(),
            district: "Nha Trang".to_string(),
            city: "Khanh Hoa".to_string(),
            note: None,
        },
        lines,
        subtotal,
        discount: Money::zero(),
        shipping_fee: Money::new(20_000),
        total: subtotal + Money::new(20_000),
        payment_method: method,
        coupon_id: None,
        placed_at: Utc::now(),
    }
}

async fn available(store: &PostgresOrderStore, id: i64) -> i64 {
    store.get_variants(&[VariantId::new(id)]).await.unwrap()[&VariantId::new(id)].available
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn create_order_reserves_stock_and_opens_payment() {
    let store = get_test_store().await;
    let (order, payment) = store
        .create_order(&draft(&[(10, 2, 50_000), (11, 1, 120_000)], PaymentMethod::Momo))
        .await
        .unwrap();

    assert_eq!(order.total, Money::new(240_000));
    assert_eq!(payment.order_id, order.id);
    assert!(!payment.paid);
    assert_eq!(available(&store, 10).await, 3);
    assert_eq!(available(&store, 11).await, 4);

    let loaded = store.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(loaded.lines, order.lines);
    assert!(loaded.totals_are_consistent());
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn short_line_rolls_back_whole_reservation() {
    let store = get_test_store().await;
    let err = store
        .create_order(&draft(&[(10, 1, 50_000), (11, 9, 120_000)], PaymentMethod::CashOnDelivery))
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::InsufficientStock { requested: 9, .. }));
    assert_eq!(available(&store, 10).await, 5);
    assert_eq!(available(&store, 11).await, 5);
    assert_eq!(store.list_orders(&OrderQuery::new()).await.unwrap().total_items, 0);
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn concurrent_orders_never_oversell() {
    let store = get_test_store().await;

    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .create_order(&draft(&[(10, 1, 50_000)], PaymentMethod::CashOnDelivery))
                    .await
            })
        })
        .collect();

    let mut placed = 0;
    for attempt in attempts {
        if attempt.await.unwrap().is_ok() {
            placed += 1;
        }
    }

    assert_eq!(placed, 5);
    assert_eq!(available(&store, 10).await, 0);
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn cancellation_restores_stock() {
    let store = get_test_store().await;
    let (order, _) = store
        .create_order(&draft(&[(10, 2, 50_000), (11, 1, 120_000)], PaymentMethod::CashOnDelivery))
        .await
        .unwrap();

    let cancellation = Cancellation {
        order_id: order.id,
        from: OrderStatus::Placed,
        reason: Some("wrong size".to_string()),
        at: Utc::now(),
    };
    let cancelled = store.cancel_order(&cancellation).await.unwrap();

    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(cancelled.cancellation_reason.as_deref(), Some("wrong size"));
    assert_eq!(available(&store, 10).await, 5);
    assert_eq!(available(&store, 11).await, 5);

    let again = store.cancel_order(&cancellation).await.unwrap_err();
    assert!(matches!(again, StoreError::StatusConflict { .. }));
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn status_update_is_compare_and_set() {
    let store = get_test_store().await;
    let (order, _) = store
        .create_order(&draft(&[(10, 1, 50_000)], PaymentMethod::CashOnDelivery))
        .await
        .unwrap();
    let table = TransitionTable::standard();

    let deliver = order
        .plan_transition(table, OrderStatus::Delivered, None, Utc::now())
        .unwrap();
    let ship = order
        .plan_transition(table, OrderStatus::Shipping, None, Utc::now())
        .unwrap();

    let delivered = store.update_order_status(&deliver).await.unwrap();
    assert_eq!(delivered.status, OrderStatus::Delivered);
    assert!(store.latest_payment(order.id).await.unwrap().unwrap().paid);

    let err = store.update_order_status(&ship).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::StatusConflict { actual: OrderStatus::Delivered, .. }
    ));
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn confirmation_is_applied_once() {
    let store = get_test_store().await;
    let (order, _) = store
        .create_order(&draft(&[(10, 1, 50_000)], PaymentMethod::Vnpay))
        .await
        .unwrap();
    let confirmation = PaymentConfirmation {
        order_id: order.id,
        payment_id: None,
        method: PaymentMethod::Vnpay,
        external_transaction_id: "14226112".to_string(),
        paid_at: Utc::now(),
    };

    let first = store.apply_payment_confirmation(&confirmation).await.unwrap();
    assert!(first.is_applied());
    let second = store.apply_payment_confirmation(&confirmation).await.unwrap();
    assert_eq!(second, ConfirmationOutcome::Duplicate);

    let payment = store.latest_payment(order.id).await.unwrap().unwrap();
    assert!(payment.paid);
    assert_eq!(payment.external_transaction_id.as_deref(), Some("14226112"));

    assert!(store.mark_refunded(payment.id, Utc::now()).await.unwrap());
    assert!(!store.mark_refunded(payment.id, Utc::now()).await.unwrap());
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn confirmation_settles_the_named_attempt() {
    let store = get_test_store().await;
    let (order, first) = store
        .create_order(&draft(&[(10, 1, 50_000)], PaymentMethod::Momo))
        .await
        .unwrap();
    let second = store
        .create_payment(order.id, PaymentMethod::Vnpay, Utc::now())
        .await
        .unwrap();

    let outcome = store
        .apply_payment_confirmation(&PaymentConfirmation {
            order_id: order.id,
            payment_id: Some(first.id),
            method: PaymentMethod::Momo,
            external_transaction_id: "4088878653".to_string(),
            paid_at: Utc::now(),
        })
        .await
        .unwrap();
    assert!(matches!(outcome, ConfirmationOutcome::Applied(ref p) if p.id == first.id));

    let payments = store.list_payments(order.id).await.unwrap();
    assert_eq!(payments.len(), 2);
    assert!(payments[0].paid);
    assert_eq!(payments[1].id, second.id);
    assert!(!payments[1].paid);

    let (other, _) = store
        .create_order(&draft(&[(11, 1, 120_000)], PaymentMethod::Momo))
        .await
        .unwrap();
    let err = store
        .apply_payment_confirmation(&PaymentConfirmation {
            order_id: other.id,
            payment_id: Some(second.id),
            method: PaymentMethod::Vnpay,
            external_transaction_id: "14226112".to_string(),
            paid_at: Utc::now(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound { entity: "Payment", .. }));
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn concurrent_refund_claims_admit_one() {
    let store = get_test_store().await;
    let (_, payment) = store
        .create_order(&draft(&[(10, 1, 50_000)], PaymentMethod::Momo))
        .await
        .unwrap();
    let payment_id = payment.id;
    let now = Utc::now();
    let stale_before = now - chrono::Duration::minutes(5);

    let attempts: Vec<_> = (0..4)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.claim_refund(payment_id, now, stale_before).await })
        })
        .collect();

    let mut claimed = 0;
    for attempt in attempts {
        if attempt.await.unwrap().unwrap() {
            claimed += 1;
        }
    }
    assert_eq!(claimed, 1);

    store.release_refund(payment.id).await.unwrap();
    assert!(store.claim_refund(payment.id, now, stale_before).await.unwrap());
    assert!(store.mark_refunded(payment.id, now).await.unwrap());
    assert!(!store.claim_refund(payment.id, now, now).await.unwrap());
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn list_orders_filters_and_paginates() {
    let store = get_test_store().await;
    for _ in 0..3 {
        store
            .create_order(&draft(&[(10, 1, 50_000)], PaymentMethod::CashOnDelivery))
            .await
            .unwrap();
    }

    let page = store
        .list_orders(&OrderQuery::new().phone("654").paginate(1, 2))
        .await
        .unwrap();
    assert_eq!(page.total_items, 3);
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.total_pages(), 2);
    assert_eq!(page.items[0].id, OrderId::new(3));
    assert_eq!(page.items[0].lines.len(), 1);

    let none = store
        .list_orders(&OrderQuery::new().status(OrderStatus::Shipping))
        .await
        .unwrap();
    assert!(none.items.is_empty());
}
