use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CouponId, Money, OrderId, PaymentId, UserId, VariantId};
use domain::{
    Cancellation, Contact, Coupon, DiscountKind, Order, OrderDraft, OrderLine, OrderStatus,
    Payment, PaymentConfirmation, PaymentFailure, PaymentMethod, ShippingAddress, StatusChange,
    Variant,
};
use sqlx::{
    PgConnection, PgPool, Postgres, Row,
    postgres::{PgArguments, PgRow},
    query::Query,
};

use crate::{
    ConfirmationOutcome, OrderQuery, Page, Result, StoreError, store::OrderStore,
};

const ORDER_COLUMNS: &str = "id, user_id, contact_name, contact_phone, contact_email, \
    street, ward, district, city, note, subtotal, discount, shipping_fee, total, status, \
    payment_method, coupon_id, placed_at, shipped_at, cancelled_at, cancellation_reason";

const PAYMENT_COLUMNS: &str = "id, order_id, method, paid, external_transaction_id, paid_at, \
    failure_reason, refunded_at, refund_started_at, created_at";

/// PostgreSQL-backed order store.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn ensure_payment_exists(&self, payment_id: PaymentId) -> Result<()> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM payments WHERE id = $1)")
            .bind(payment_id.get())
            .fetch_one(&self.pool)
            .await?;
        if exists {
            Ok(())
        } else {
            Err(StoreError::not_found("Payment", payment_id))
        }
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }
}

fn parse_text<T>(row: &PgRow, column: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|e| StoreError::Corrupt(format!("{column}: {e}")))
}

fn row_to_line(row: &PgRow) -> Result<(OrderId, OrderLine)> {
    let quantity: i64 = row.try_get("quantity")?;
    let quantity = u32::try_from(quantity)
        .map_err(|_| StoreError::Corrupt(format!("quantity: {quantity}")))?;
    Ok((
        OrderId::new(row.try_get("order_id")?),
        OrderLine::new(
            VariantId::new(row.try_get("variant_id")?),
            quantity,
            Money::new(row.try_get("unit_price")?),
        ),
    ))
}

fn row_to_order(row: &PgRow, lines: Vec<OrderLine>) -> Result<Order> {
    Ok(Order {
        id: OrderId::new(row.try_get("id")?),
        user_id: row.try_get::<Option<i64>, _>("user_id")?.map(UserId::new),
        contact: Contact {
            name: row.try_get("contact_name")?,
            phone: row.try_get("contact_phone")?,
            email: row.try_get("contact_email")?,
        },
        shipping: ShippingAddress {
            street: row.try_get("street")?,
            ward: row.try_get("ward")?,
            district: row.try_get("district")?,
            city: row.try_get("city")?,
            note: row.try_get("note")?,
        },
        lines,
        subtotal: Money::new(row.try_get("subtotal")?),
        discount: Money::new(row.try_get("discount")?),
        shipping_fee: Money::new(row.try_get("shipping_fee")?),
        total: Money::new(row.try_get("total")?),
        status: parse_text(row, "status")?,
        payment_method: parse_text(row, "payment_method")?,
        coupon_id: row.try_get::<Option<i64>, _>("coupon_id")?.map(CouponId::new),
        placed_at: row.try_get("placed_at")?,
        shipped_at: row.try_get("shipped_at")?,
        cancelled_at: row.try_get("cancelled_at")?,
        cancellation_reason: row.try_get("cancellation_reason")?,
    })
}

fn row_to_payment(row: &PgRow) -> Result<Payment> {
    Ok(Payment {
        id: PaymentId::new(row.try_get("id")?),
        order_id: OrderId::new(row.try_get("order_id")?),
        method: parse_text(row, "method")?,
        paid: row.try_get("paid")?,
        external_transaction_id: row.try_get("external_transaction_id")?,
        paid_at: row.try_get("paid_at")?,
        failure_reason: row.try_get("failure_reason")?,
        refunded_at: row.try_get("refunded_at")?,
        refund_started_at: row.try_get("refund_started_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_coupon(row: &PgRow) -> Result<Coupon> {
    let kind = match row.try_get::<String, _>("discount_kind")?.as_str() {
        "fixed_amount" => DiscountKind::FixedAmount,
        "percentage" => DiscountKind::Percentage,
        other => return Err(StoreError::Corrupt(format!("discount_kind: {other}"))),
    };
    Ok(Coupon {
        id: CouponId::new(row.try_get("id")?),
        code: row.try_get("code")?,
        kind,
        value: row.try_get("value")?,
        max_discount: row.try_get::<Option<i64>, _>("max_discount")?.map(Money::new),
        min_order_value: Money::new(row.try_get("min_order_value")?),
        starts_at: row.try_get("starts_at")?,
        ends_at: row.try_get("ends_at")?,
    })
}

async fn load_lines(
    conn: &mut PgConnection,
    order_ids: &[i64],
) -> Result<HashMap<OrderId, Vec<OrderLine>>> {
    let rows = sqlx::query(
        r#"
        SELECT order_id, variant_id, quantity, unit_price
        FROM order_lines
        WHERE order_id = ANY($1)
        ORDER BY order_id, variant_id
        "#,
    )
    .bind(order_ids)
    .fetch_all(&mut *conn)
    .await?;

    let mut lines: HashMap<OrderId, Vec<OrderLine>> = HashMap::new();
    for row in &rows {
        let (order_id, line) = row_to_line(row)?;
        lines.entry(order_id).or_default().push(line);
    }
    Ok(lines)
}

/// Locks the attempt a callback settles: the named one if it belongs to the
/// order, otherwise the latest.
async fn lock_settled_payment(
    conn: &mut PgConnection,
    order_id: OrderId,
    payment_id: Option<PaymentId>,
) -> Result<Payment> {
    let row = match payment_id {
        Some(payment_id) => {
            let sql = format!(
                "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1 AND order_id = $2 FOR UPDATE"
            );
            sqlx::query(&sql)
                .bind(payment_id.get())
                .bind(order_id.get())
                .fetch_optional(&mut *conn)
                .await?
                .ok_or_else(|| StoreError::not_found("Payment", payment_id))?
        }
        None => {
            let sql = format!(
                "SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = $1 ORDER BY id DESC LIMIT 1 FOR UPDATE"
            );
            sqlx::query(&sql)
                .bind(order_id.get())
                .fetch_optional(&mut *conn)
                .await?
                .ok_or_else(|| StoreError::not_found("Payment", order_id))?
        }
    };
    row_to_payment(&row)
}

async fn load_order(conn: &mut PgConnection, order_id: OrderId) -> Result<Option<Order>> {
    let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
    let Some(row) = sqlx::query(&sql)
        .bind(order_id.get())
        .fetch_optional(&mut *conn)
        .await?
    else {
        return Ok(None);
    };

    let mut lines = load_lines(conn, &[order_id.get()]).await?;
    row_to_order(&row, lines.remove(&order_id).unwrap_or_default()).map(Some)
}

/// Explains why a compare-and-set on `orders.status` matched no row.
async fn status_conflict(
    conn: &mut PgConnection,
    order_id: OrderId,
    expected: OrderStatus,
) -> StoreError {
    let current: std::result::Result<Option<String>, sqlx::Error> =
        sqlx::query_scalar("SELECT status FROM orders WHERE id = $1")
            .bind(order_id.get())
            .fetch_optional(conn)
            .await;

    match current {
        Ok(None) => StoreError::not_found("Order", order_id),
        Ok(Some(raw)) => match raw.parse::<OrderStatus>() {
            Ok(actual) => StoreError::StatusConflict {
                order_id,
                expected,
                actual,
            },
            Err(e) => StoreError::Corrupt(format!("status: {e}")),
        },
        Err(e) => StoreError::Database(e),
    }
}

fn filter_clause(query: &OrderQuery) -> (String, usize) {
    let mut sql = String::from(" WHERE 1=1");
    let mut param_count = 0;

    if query.status.is_some() {
        param_count += 1;
        sql.push_str(&format!(" AND status = ${param_count}"));
    }
    if query.user_id.is_some() {
        param_count += 1;
        sql.push_str(&format!(" AND user_id = ${param_count}"));
    }
    if query.placed_from.is_some() {
        param_count += 1;
        sql.push_str(&format!(" AND placed_at >= ${param_count}"));
    }
    if query.placed_to.is_some() {
        param_count += 1;
        sql.push_str(&format!(" AND placed_at <= ${param_count}"));
    }
    if query.phone.is_some() {
        param_count += 1;
        sql.push_str(&format!(" AND contact_phone LIKE ${param_count}"));
    }

    (sql, param_count)
}

fn bind_filters<'q>(
    mut q: Query<'q, Postgres, PgArguments>,
    query: &OrderQuery,
) -> Query<'q, Postgres, PgArguments> {
    if let Some(status) = query.status {
        q = q.bind(status.as_str());
    }
    if let Some(user_id) = query.user_id {
        q = q.bind(user_id.get());
    }
    if let Some(from) = query.placed_from {
        q = q.bind(from);
    }
    if let Some(to) = query.placed_to {
        q = q.bind(to);
    }
    if let Some(ref phone) = query.phone {
        q = q.bind(format!("%{phone}%"));
    }
    q
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn get_variants(&self, ids: &[VariantId]) -> Result<HashMap<VariantId, Variant>> {
        let raw: Vec<i64> = ids.iter().map(VariantId::get).collect();
        let rows = sqlx::query(
            "SELECT id, product_id, available, price FROM product_variants WHERE id = ANY($1)",
        )
        .bind(&raw)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<(VariantId, Variant)> {
                let variant = Variant::new(
                    VariantId::new(row.try_get("id")?),
                    row.try_get("product_id")?,
                    row.try_get("available")?,
                    Money::new(row.try_get("price")?),
                );
                Ok((variant.id, variant))
            })
            .collect()
    }

    async fn get_coupon_by_code(&self, code: &str) -> Result<Option<Coupon>> {
        let row = sqlx::query(
            r#"
            SELECT id, code, discount_kind, value, max_discount, min_order_value, starts_at, ends_at
            FROM coupons
            WHERE code = $1
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_coupon).transpose()
    }

    async fn user_exists(&self, user_id: UserId) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
            .bind(user_id.get())
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    #[tracing::instrument(skip(self, draft), fields(lines = draft.lines.len()))]
    async fn create_order(&self, draft: &OrderDraft) -> Result<(Order, Payment)> {
        let mut tx = self.pool.begin().await?;

        // Draft lines are sorted by variant id, so concurrent orders lock rows
        // in the same order.
        for line in &draft.lines {
            let reserved = sqlx::query(
                r#"
                UPDATE product_variants
                SET available = available - $2
                WHERE id = $1 AND available >= $2
                "#,
            )
            .bind(line.variant_id.get())
            .bind(i64::from(line.quantity))
            .execute(&mut *tx)
            .await?;

            if reserved.rows_affected() == 0 {
                let available: Option<i64> =
                    sqlx::query_scalar("SELECT available FROM product_variants WHERE id = $1")
                        .bind(line.variant_id.get())
                        .fetch_optional(&mut *tx)
                        .await?;

                // Dropping `tx` rolls back the lines already reserved.
                return Err(match available {
                    None => StoreError::not_found("Variant", line.variant_id),
                    Some(available) => StoreError::InsufficientStock {
                        variant_id: line.variant_id,
                        requested: line.quantity,
                        available,
                    },
                });
            }
        }

        let order_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO orders (
                user_id, contact_name, contact_phone, contact_email,
                street, ward, district, city, note,
                subtotal, discount, shipping_fee, total,
                status, payment_method, coupon_id, placed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            RETURNING id
            "#,
        )
        .bind(draft.user_id.map(|u| u.get()))
        .bind(&draft.contact.name)
        .bind(&draft.contact.phone)
        .bind(&draft.contact.email)
        .bind(&draft.shipping.street)
        .bind(&draft.shipping.ward)
        .bind(&draft.shipping.district)
        .bind(&draft.shipping.city)
        .bind(&draft.shipping.note)
        .bind(draft.subtotal.amount())
        .bind(draft.discount.amount())
        .bind(draft.shipping_fee.amount())
        .bind(draft.total.amount())
        .bind(OrderStatus::Placed.as_str())
        .bind(draft.payment_method.as_str())
        .bind(draft.coupon_id.map(|c| c.get()))
        .bind(draft.placed_at)
        .fetch_one(&mut *tx)
        .await?;

        for line in &draft.lines {
            sqlx::query(
                r#"
                INSERT INTO order_lines (order_id, variant_id, quantity, unit_price)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(order_id)
            .bind(line.variant_id.get())
            .bind(i64::from(line.quantity))
            .bind(line.unit_price.amount())
            .execute(&mut *tx)
            .await?;
        }

        let sql = format!(
            "INSERT INTO payments (order_id, method, created_at) VALUES ($1, $2, $3) RETURNING {PAYMENT_COLUMNS}"
        );
        let payment_row = sqlx::query(&sql)
            .bind(order_id)
            .bind(draft.payment_method.as_str())
            .bind(draft.placed_at)
            .fetch_one(&mut *tx)
            .await?;
        let payment = row_to_payment(&payment_row)?;

        tx.commit().await?;

        let order = Order {
            id: OrderId::new(order_id),
            user_id: draft.user_id,
            contact: draft.contact.clone(),
            shipping: draft.shipping.clone(),
            lines: draft.lines.clone(),
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
        };
        Ok((order, payment))
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        load_order(&mut conn, order_id).await
    }

    async fn list_orders(&self, query: &OrderQuery) -> Result<Page<Order>> {
        let (filters, param_count) = filter_clause(query);
        let mut conn = self.pool.acquire().await?;

        let count_sql = format!("SELECT COUNT(*) AS total FROM orders{filters}");
        let total: i64 = bind_filters(sqlx::query(&count_sql), query)
            .fetch_one(&mut *conn)
            .await?
            .try_get("total")?;

        let select_sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders{filters} ORDER BY placed_at DESC, id DESC LIMIT ${} OFFSET ${}",
            param_count + 1,
            param_count + 2
        );
        let rows = bind_filters(sqlx::query(&select_sql), query)
            .bind(i64::from(query.limit))
            .bind(query.offset() as i64)
            .fetch_all(&mut *conn)
            .await?;

        let ids = rows
            .iter()
            .map(|row| row.try_get::<i64, _>("id"))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut lines = load_lines(&mut conn, &ids).await?;

        let orders = rows
            .iter()
            .map(|row| -> Result<Order> {
                let id = OrderId::new(row.try_get("id")?);
                row_to_order(row, lines.remove(&id).unwrap_or_default())
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Page::new(orders, query, total.max(0) as u64))
    }

    #[tracing::instrument(skip(self, change), fields(order_id = %change.order_id, to = %change.to))]
    async fn update_order_status(&self, change: &StatusChange) -> Result<Order> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE orders SET status = $3, shipped_at = $4 WHERE id = $1 AND status = $2",
        )
        .bind(change.order_id.get())
        .bind(change.from.as_str())
        .bind(change.to.as_str())
        .bind(change.shipped_at)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(status_conflict(&mut tx, change.order_id, change.from).await);
        }

        if change.marks_payment_paid {
            sqlx::query(
                r#"
                UPDATE payments
                SET paid = TRUE, paid_at = COALESCE(paid_at, $2)
                WHERE id = (SELECT id FROM payments WHERE order_id = $1 ORDER BY id DESC LIMIT 1)
                "#,
            )
            .bind(change.order_id.get())
            .bind(change.at)
            .execute(&mut *tx)
            .await?;
        }

        let order = load_order(&mut tx, change.order_id)
            .await?
            .ok_or_else(|| StoreError::not_found("Order", change.order_id))?;
        tx.commit().await?;
        Ok(order)
    }

    #[tracing::instrument(skip(self, cancellation), fields(order_id = %cancellation.order_id))]
    async fn cancel_order(&self, cancellation: &Cancellation) -> Result<Order> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE orders
            SET status = $3, cancelled_at = $4, cancellation_reason = $5
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(cancellation.order_id.get())
        .bind(cancellation.from.as_str())
        .bind(OrderStatus::Cancelled.as_str())
        .bind(cancellation.at)
        .bind(&cancellation.reason)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(status_conflict(&mut tx, cancellation.order_id, cancellation.from).await);
        }

        let order = load_order(&mut tx, cancellation.order_id)
            .await?
            .ok_or_else(|| StoreError::not_found("Order", cancellation.order_id))?;

        for line in &order.lines {
            sqlx::query("UPDATE product_variants SET available = available + $2 WHERE id = $1")
                .bind(line.variant_id.get())
                .bind(i64::from(line.quantity))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(order)
    }

    async fn latest_payment(&self, order_id: OrderId) -> Result<Option<Payment>> {
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = $1 ORDER BY id DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(order_id.get())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_payment).transpose()
    }

    async fn list_payments(&self, order_id: OrderId) -> Result<Vec<Payment>> {
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = $1 ORDER BY id");
        let rows = sqlx::query(&sql)
            .bind(order_id.get())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_payment).collect()
    }

    async fn create_payment(
        &self,
        order_id: OrderId,
        method: PaymentMethod,
        at: DateTime<Utc>,
    ) -> Result<Payment> {
        let sql = format!(
            "INSERT INTO payments (order_id, method, created_at) VALUES ($1, $2, $3) RETURNING {PAYMENT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(order_id.get())
            .bind(method.as_str())
            .bind(at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.is_foreign_key_violation()
                {
                    return StoreError::not_found("Order", order_id);
                }
                StoreError::Database(e)
            })?;
        row_to_payment(&row)
    }

    #[tracing::instrument(
        skip(self, confirmation),
        fields(order_id = %confirmation.order_id, gateway = %confirmation.method)
    )]
    async fn apply_payment_confirmation(
        &self,
        confirmation: &PaymentConfirmation,
    ) -> Result<ConfirmationOutcome> {
        let mut tx = self.pool.begin().await?;

        let target = lock_settled_payment(
            &mut tx,
            confirmation.order_id,
            confirmation.payment_id,
        )
        .await?;

        let recorded = sqlx::query(
            r#"
            INSERT INTO payment_notifications (provider, external_transaction_id, order_id, payment_id, received_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (provider, external_transaction_id) DO NOTHING
            "#,
        )
        .bind(confirmation.method.as_str())
        .bind(&confirmation.external_transaction_id)
        .bind(confirmation.order_id.get())
        .bind(target.id.get())
        .bind(confirmation.paid_at)
        .execute(&mut *tx)
        .await?;

        if recorded.rows_affected() == 0 {
            return Ok(ConfirmationOutcome::Duplicate);
        }
        if target.paid {
            tx.commit().await?;
            return Ok(ConfirmationOutcome::AlreadyPaid(target));
        }

        let sql = format!(
            r#"
            UPDATE payments
            SET method = $2, paid = TRUE, external_transaction_id = $3, paid_at = $4, failure_reason = NULL
            WHERE id = $1
            RETURNING {PAYMENT_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(target.id.get())
            .bind(confirmation.method.as_str())
            .bind(&confirmation.external_transaction_id)
            .bind(confirmation.paid_at)
            .fetch_one(&mut *tx)
            .await?;
        let payment = row_to_payment(&row)?;

        tx.commit().await?;
        Ok(ConfirmationOutcome::Applied(payment))
    }

    async fn record_payment_failure(&self, failure: &PaymentFailure) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let target = lock_settled_payment(&mut tx, failure.order_id, failure.payment_id).await?;

        sqlx::query("UPDATE payments SET failure_reason = $2 WHERE id = $1 AND paid = FALSE")
            .bind(target.id.get())
            .bind(&failure.reason)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn mark_refunded(&self, payment_id: PaymentId, at: DateTime<Utc>) -> Result<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE payments
            SET refunded_at = $2, refund_started_at = NULL
            WHERE id = $1 AND refunded_at IS NULL
            "#,
        )
        .bind(payment_id.get())
        .bind(at)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 1 {
            return Ok(true);
        }
        self.ensure_payment_exists(payment_id).await?;
        Ok(false)
    }

    async fn claim_refund(
        &self,
        payment_id: PaymentId,
        at: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool> {
        let claimed = sqlx::query(
            r#"
            UPDATE payments
            SET refund_started_at = $2
            WHERE id = $1
              AND refunded_at IS NULL
              AND (refund_started_at IS NULL OR refund_started_at < $3)
            "#,
        )
        .bind(payment_id.get())
        .bind(at)
        .bind(stale_before)
        .execute(&self.pool)
        .await?;

        if claimed.rows_affected() == 1 {
            return Ok(true);
        }
        self.ensure_payment_exists(payment_id).await?;
        Ok(false)
    }

    async fn release_refund(&self, payment_id: PaymentId) -> Result<()> {
        let released = sqlx::query("UPDATE payments SET refund_started_at = NULL WHERE id = $1")
            .bind(payment_id.get())
            .execute(&self.pool)
            .await?;
        if released.rows_affected() == 0 {
            return Err(StoreError::not_found("Payment", payment_id));
        }
        Ok(())
    }
}
