/// Order model: checkout carts, payment and fulfilment state
///
/// Stock is reserved when the pending order is created (same transaction as
/// the order rows) and returned whenever an order is cancelled, whether by
/// an admin, an expired checkout session or the stale-order sweep. Payment
/// only moves the status forward.
///
/// # Status transitions
///
/// ```text
/// pending ──paid (webhook)──> paid ──> shipped ──> delivered
///    │                         │
///    └──> cancelled <──────────┘
/// ```

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::edition::{Edition, EditionFormat};
use super::ModelError;
use crate::pagination::{Page, PageRequest};

const ORDER_COLUMNS: &str = "id, user_id, status, total_cents, currency, stripe_session_id, \
     stripe_payment_intent, customer_email, paid_at, created_at, updated_at";

pub const MAX_CART_LINES: usize = 50;
pub const MAX_LINE_QUANTITY: i32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Awaiting checkout completion
    Pending,
    Paid,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Whether payment has been received for an order in this state
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            OrderStatus::Paid | OrderStatus::Shipped | OrderStatus::Delivered
        )
    }

    /// Transitions an admin may apply; `pending -> paid` only happens via payment
    pub fn can_transition_to(&self, target: OrderStatus) -> bool {
        matches!(
            (self, target),
            (OrderStatus::Pending, OrderStatus::Cancelled)
                | (OrderStatus::Paid, OrderStatus::Shipped)
                | (OrderStatus::Paid, OrderStatus::Cancelled)
                | (OrderStatus::Shipped, OrderStatus::Delivered)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Order {
    pub id: Uuid,
    pub user_id: String,
    pub status: OrderStatus,
    pub total_cents: i64,
    pub currency: String,
    pub stripe_session_id: Option<String>,
    pub stripe_payment_intent: Option<String>,
    pub customer_email: Option<String>,
    /// Set once payment is received; survives a later cancellation
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub edition_id: Uuid,
    pub quantity: i32,
    pub unit_price_cents: i64,
    pub work_title: String,
    pub format: EditionFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
}

/// One requested cart line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub edition_id: Uuid,
    pub quantity: i32,
}

/// A cart line priced from the current edition row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedLine {
    pub edition_id: Uuid,
    /// Display name, e.g. "Dune (paperback)"
    pub name: String,
    pub quantity: i32,
    pub unit_price_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedCart {
    pub lines: Vec<PricedLine>,
    pub currency: String,
    pub total_cents: i64,
}

/// A freshly created pending order with the lines it was priced from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOrder {
    pub order: Order,
    pub cart: PricedCart,
}

/// Result of applying a completed payment
#[derive(Debug, Clone)]
pub enum PaymentOutcome {
    Paid(Order),
    /// Webhook redelivery for an order that was already paid, including
    /// one an admin cancelled afterwards
    AlreadySettled(Order),
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct CartEdition {
    #[sqlx(flatten)]
    edition: Edition,
    work_title: String,
}

/// Merges duplicate editions and checks cart bounds
///
/// Lines keep the order in which each edition first appeared.
///
/// # Errors
///
/// `ModelError::Invalid` for an empty cart, too many lines, or a quantity
/// outside `1..=MAX_LINE_QUANTITY` after merging.
pub fn normalize_cart(lines: &[CartLine]) -> Result<Vec<CartLine>, ModelError> {
    if lines.is_empty() {
        return Err(ModelError::Invalid("cart is empty".to_string()));
    }

    let mut merged: Vec<CartLine> = Vec::with_capacity(lines.len());
    let mut index: HashMap<Uuid, usize> = HashMap::with_capacity(lines.len());

    for line in lines {
        if line.quantity < 1 {
            return Err(ModelError::Invalid(format!(
                "quantity for edition {} must be at least 1",
                line.edition_id
            )));
        }
        match index.get(&line.edition_id) {
            Some(&i) => merged[i].quantity = merged[i].quantity.saturating_add(line.quantity),
            None => {
                index.insert(line.edition_id, merged.len());
                merged.push(*line);
            }
        }
    }

    if merged.len() > MAX_CART_LINES {
        return Err(ModelError::Invalid(format!(
            "cart may contain at most {} different editions",
            MAX_CART_LINES
        )));
    }

    if let Some(line) = merged.iter().find(|l| l.quantity > MAX_LINE_QUANTITY) {
        return Err(ModelError::Invalid(format!(
            "quantity for edition {} must be at most {}",
            line.edition_id, MAX_LINE_QUANTITY
        )));
    }

    Ok(merged)
}

/// Prices normalized lines against the editions they reference
fn price_cart(lines: &[CartLine], editions: &[CartEdition]) -> Result<PricedCart, ModelError> {
    let by_id: HashMap<Uuid, &CartEdition> =
        editions.iter().map(|e| (e.edition.id, e)).collect();

    let mut priced = Vec::with_capacity(lines.len());
    let mut currency: Option<&str> = None;
    let mut total_cents: i64 = 0;

    for line in lines {
        let entry = by_id
            .get(&line.edition_id)
            .ok_or(ModelError::NotFound("Edition"))?;
        let edition = &entry.edition;

        match currency {
            None => currency = Some(edition.currency.as_str()),
            Some(c) if c != edition.currency => {
                return Err(ModelError::Invalid(
                    "all items in a cart must use the same currency".to_string(),
                ))
            }
            Some(_) => {}
        }

        if !edition.can_fulfil(line.quantity) {
            return Err(ModelError::Conflict(format!(
                "insufficient stock for edition {}",
                edition.id
            )));
        }

        let line_total = edition
            .price_cents
            .checked_mul(i64::from(line.quantity))
            .and_then(|t| total_cents.checked_add(t))
            .ok_or_else(|| ModelError::Invalid("order total is too large".to_string()))?;
        total_cents = line_total;

        priced.push(PricedLine {
            edition_id: edition.id,
            name: format!("{} ({})", entry.work_title, edition.format.as_str()),
            quantity: line.quantity,
            unit_price_cents: edition.price_cents,
        });
    }

    Ok(PricedCart {
        lines: priced,
        currency: currency.unwrap_or("usd").to_string(),
        total_cents,
    })
}

/// Puts reserved copies back for every physical line of the given orders
async fn restore_stock(conn: &mut PgConnection, order_ids: &[Uuid]) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE book_editions e
         SET stock = e.stock + reserved.quantity, updated_at = NOW()
         FROM (
             SELECT edition_id, SUM(quantity)::int AS quantity
             FROM order_items
             WHERE order_id = ANY($1)
             GROUP BY edition_id
         ) reserved
         WHERE e.id = reserved.edition_id
           AND e.format IN ('hardcover', 'paperback')",
    )
    .bind(order_ids)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

/// Takes stock for every line of an order, in edition id order
async fn reserve_stock(conn: &mut PgConnection, lines: &[CartLine]) -> Result<(), ModelError> {
    let mut sorted: BTreeMap<Uuid, i32> = BTreeMap::new();
    for line in lines {
        *sorted.entry(line.edition_id).or_default() += line.quantity;
    }

    for (edition_id, quantity) in sorted {
        Edition::decrement_stock(&mut *conn, edition_id, quantity).await?;
    }

    Ok(())
}

async fn lock_order(conn: &mut PgConnection, id: Uuid) -> Result<Option<Order>, sqlx::Error> {
    sqlx::query_as::<_, Order>(&format!(
        "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await
}

async fn set_status(
    conn: &mut PgConnection,
    id: Uuid,
    status: OrderStatus,
) -> Result<Order, sqlx::Error> {
    sqlx::query_as::<_, Order>(&format!(
        "UPDATE orders SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING {ORDER_COLUMNS}"
    ))
    .bind(id)
    .bind(status)
    .fetch_one(&mut *conn)
    .await
}

impl Order {
    /// Prices the cart, reserves stock and inserts the order with its items
    ///
    /// # Errors
    ///
    /// - `ModelError::Invalid` for cart bounds or mixed currencies
    /// - `ModelError::NotFound("Edition")` for an unknown edition
    /// - `ModelError::Conflict` when stock is insufficient
    pub async fn create_pending(
        pool: &PgPool,
        user_id: &str,
        lines: &[CartLine],
    ) -> Result<PendingOrder, ModelError> {
        let lines = normalize_cart(lines)?;
        let ids: Vec<Uuid> = lines.iter().map(|l| l.edition_id).collect();

        let mut tx = pool.begin().await?;

        let editions = sqlx::query_as::<_, CartEdition>(
            "SELECT e.id, e.work_id, e.isbn, e.format, e.language, e.publisher, e.published_on,
                    e.page_count, e.price_cents, e.currency, e.stock, e.image_url,
                    e.created_at, e.updated_at, w.title AS work_title
             FROM book_editions e
             JOIN book_works w ON w.id = e.work_id
             WHERE e.id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await?;

        let cart = price_cart(&lines, &editions)?;

        reserve_stock(&mut *tx, &lines).await?;

        let order = sqlx::query_as::<_, Order>(&format!(
            "INSERT INTO orders (user_id, total_cents, currency)
             VALUES ($1, $2, $3)
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(user_id)
        .bind(cart.total_cents)
        .bind(&cart.currency)
        .fetch_one(&mut *tx)
        .await?;

        let edition_ids: Vec<Uuid> = cart.lines.iter().map(|l| l.edition_id).collect();
        let quantities: Vec<i32> = cart.lines.iter().map(|l| l.quantity).collect();
        let prices: Vec<i64> = cart.lines.iter().map(|l| l.unit_price_cents).collect();

        sqlx::query(
            "INSERT INTO order_items (order_id, edition_id, quantity, unit_price_cents)
             SELECT $1, line.edition_id, line.quantity, line.unit_price_cents
             FROM UNNEST($2::uuid[], $3::int[], $4::bigint[])
                  AS line(edition_id, quantity, unit_price_cents)",
        )
        .bind(order.id)
        .bind(&edition_ids)
        .bind(&quantities)
        .bind(&prices)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            order_id = %order.id,
            user_id,
            lines = cart.lines.len(),
            total_cents = order.total_cents,
            currency = %order.currency,
            "Created pending order"
        );

        Ok(PendingOrder { order, cart })
    }

    /// Stores the checkout session id on a pending order
    pub async fn attach_checkout_session(
        pool: &PgPool,
        id: Uuid,
        session_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE orders SET stripe_session_id = $2, updated_at = NOW()
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .bind(session_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Order>(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_session(pool: &PgPool, session_id: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE stripe_session_id = $1"
        ))
        .bind(session_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn items(pool: &PgPool, order_id: Uuid) -> Result<Vec<OrderItem>, sqlx::Error> {
        sqlx::query_as::<_, OrderItem>(
            "SELECT oi.id, oi.order_id, oi.edition_id, oi.quantity, oi.unit_price_cents,
                    w.title AS work_title, e.format
             FROM order_items oi
             JOIN book_editions e ON e.id = oi.edition_id
             JOIN book_works w ON w.id = e.work_id
             WHERE oi.order_id = $1
             ORDER BY w.title ASC, oi.id ASC",
        )
        .bind(order_id)
        .fetch_all(pool)
        .await
    }

    pub async fn find_detail(pool: &PgPool, id: Uuid) -> Result<Option<OrderDetail>, sqlx::Error> {
        let Some(order) = Self::find_by_id(pool, id).await? else {
            return Ok(None);
        };
        let items = Self::items(pool, id).await?;
        Ok(Some(OrderDetail { order, items }))
    }

    /// Newest first
    pub async fn list_for_user(
        pool: &PgPool,
        user_id: &str,
        page: PageRequest,
    ) -> Result<Page<Self>, sqlx::Error> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(pool)
            .await?;

        if total == 0 {
            return Ok(Page::empty(page));
        }

        let items = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders
             WHERE user_id = $1
             ORDER BY created_at DESC, id ASC
             LIMIT $2 OFFSET $3"
        ))
        .bind(user_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool)
        .await?;

        Ok(Page::new(items, total, page))
    }

    pub async fn list_all(
        pool: &PgPool,
        status: Option<OrderStatus>,
        page: PageRequest,
    ) -> Result<Page<Self>, sqlx::Error> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM orders WHERE ($1::order_status IS NULL OR status = $1)",
        )
        .bind(status)
        .fetch_one(pool)
        .await?;

        if total == 0 {
            return Ok(Page::empty(page));
        }

        let items = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders
             WHERE ($1::order_status IS NULL OR status = $1)
             ORDER BY created_at DESC, id ASC
             LIMIT $2 OFFSET $3"
        ))
        .bind(status)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool)
        .await?;

        Ok(Page::new(items, total, page))
    }

    /// Applies a completed checkout session
    ///
    /// Redelivered events for an order that was ever paid are reported as
    /// [`PaymentOutcome::AlreadySettled`] and leave status and stock alone.
    /// A payment for an order cancelled while still pending re-reserves its
    /// stock first.
    ///
    /// # Errors
    ///
    /// - `ModelError::NotFound("Order")` if no order has this session
    /// - `ModelError::Conflict` if a cancelled order can no longer be filled
    pub async fn mark_paid(
        pool: &PgPool,
        session_id: &str,
        payment_intent: Option<&str>,
        customer_email: Option<&str>,
    ) -> Result<PaymentOutcome, ModelError> {
        let mut tx = pool.begin().await?;

        let order = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE stripe_session_id = $1 FOR UPDATE"
        ))
        .bind(session_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(ModelError::NotFound("Order"))?;

        if order.status.is_settled() || order.paid_at.is_some() {
            tx.rollback().await?;
            return Ok(PaymentOutcome::AlreadySettled(order));
        }

        if order.status == OrderStatus::Cancelled {
            let lines: Vec<CartLine> = sqlx::query_as::<_, (Uuid, i32)>(
                "SELECT edition_id, quantity FROM order_items WHERE order_id = $1",
            )
            .bind(order.id)
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .map(|(edition_id, quantity)| CartLine { edition_id, quantity })
            .collect();

            reserve_stock(&mut *tx, &lines).await?;
            tracing::warn!(order_id = %order.id, "Payment received for cancelled order; stock re-reserved");
        }

        let paid = sqlx::query_as::<_, Order>(&format!(
            "UPDATE orders
             SET status = 'paid',
                 stripe_payment_intent = COALESCE($2, stripe_payment_intent),
                 customer_email = COALESCE($3, customer_email),
                 paid_at = NOW(),
                 updated_at = NOW()
             WHERE id = $1
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(order.id)
        .bind(payment_intent)
        .bind(customer_email)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(order_id = %paid.id, total_cents = paid.total_cents, "Order paid");

        Ok(PaymentOutcome::Paid(paid))
    }

    /// Cancels the pending order for an expired checkout session
    ///
    /// Returns `None` when the session is unknown or the order had already
    /// moved on.
    pub async fn cancel_pending_by_session(
        pool: &PgPool,
        session_id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let order = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders
             WHERE stripe_session_id = $1 AND status = 'pending'
             FOR UPDATE"
        ))
        .bind(session_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(order) = order else {
            tx.rollback().await?;
            return Ok(None);
        };

        restore_stock(&mut *tx, &[order.id]).await?;
        let cancelled = set_status(&mut *tx, order.id, OrderStatus::Cancelled).await?;

        tx.commit().await?;

        tracing::info!(order_id = %cancelled.id, "Cancelled order for expired checkout session");
        Ok(Some(cancelled))
    }

    /// Moves an order to `target`, returning stock when it is cancelled
    ///
    /// # Errors
    ///
    /// `ModelError::Conflict` if the transition is not allowed.
    pub async fn update_status(
        pool: &PgPool,
        id: Uuid,
        target: OrderStatus,
    ) -> Result<Option<Self>, ModelError> {
        let mut tx = pool.begin().await?;

        let Some(order) = lock_order(&mut *tx, id).await? else {
            tx.rollback().await?;
            return Ok(None);
        };

        if !order.status.can_transition_to(target) {
            return Err(ModelError::Conflict(format!(
                "cannot change order status from {} to {}",
                order.status.as_str(),
                target.as_str()
            )));
        }

        if target == OrderStatus::Cancelled {
            restore_stock(&mut *tx, &[order.id]).await?;
        }

        let updated = set_status(&mut *tx, id, target).await?;
        tx.commit().await?;

        tracing::info!(
            order_id = %id,
            from = order.status.as_str(),
            to = target.as_str(),
            "Order status changed"
        );

        Ok(Some(updated))
    }

    /// Cancels up to `limit` pending orders created before `cutoff`
    ///
    /// Rows locked by a concurrent sweep are skipped. Returns the ids cancelled.
    pub async fn expire_stale_pending(
        pool: &PgPool,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Uuid>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT id FROM orders
             WHERE status = 'pending' AND created_at < $1
             ORDER BY created_at ASC
             LIMIT $2
             FOR UPDATE SKIP LOCKED",
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        if ids.is_empty() {
            tx.rollback().await?;
            return Ok(ids);
        }

        restore_stock(&mut *tx, &ids).await?;

        sqlx::query(
            "UPDATE orders SET status = 'cancelled', updated_at = NOW() WHERE id = ANY($1)",
        )
        .bind(&ids)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(ids)
    }
}
