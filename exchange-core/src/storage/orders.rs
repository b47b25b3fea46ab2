//! Order store: inserts with sequence allocation, monotonic status updates,
//! and the recovery/expiration read paths.

use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use exchange_common::orders::{CancelReason, OrderId, OrderStatus, OrderType, Side, TraderId};

use super::{sequence, StorageError, StorageResult, Tx};

/// Fields the engine supplies when creating an order.
#[derive(Debug, Clone)]
pub struct OrderDraft {
    pub trader_id: TraderId,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub limit_price_in_cents: Option<i64>,
    pub quantity: i64,
    pub tif_seconds: Option<i64>,
}

/// One row of `orders`.
#[derive(Debug, Clone)]
pub struct OrderRow {
    pub order_id: OrderId,
    pub trader_id: TraderId,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub limit_price_in_cents: Option<i64>,
    pub quantity: i64,
    pub filled_quantity: i64,
    pub status: OrderStatus,
    pub tif_seconds: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
    pub sequence_number: i64,
    pub created_at: DateTime<Utc>,
}

impl OrderRow {
    /// Quantity not yet filled.
    pub fn remaining(&self) -> i64 {
        self.quantity - self.filled_quantity
    }
}

fn order_from_row(row: &PgRow) -> StorageResult<OrderRow> {
    let side: String = row.get("side");
    let order_type: String = row.get("order_type");
    let status: String = row.get("status");
    let order_id = OrderId(row.get("order_id"));

    Ok(OrderRow {
        order_id,
        trader_id: TraderId(row.get("trader_id")),
        symbol: row.get("symbol"),
        side: Side::parse(&side)
            .ok_or_else(|| StorageError::Invariant(format!("bad side '{side}' on {order_id}")))?,
        order_type: OrderType::parse(&order_type).ok_or_else(|| {
            StorageError::Invariant(format!("bad order type '{order_type}' on {order_id}"))
        })?,
        limit_price_in_cents: row.get("limit_price_in_cents"),
        quantity: row.get("quantity"),
        filled_quantity: row.get("filled_quantity"),
        status: OrderStatus::parse(&status).ok_or_else(|| {
            StorageError::Invariant(format!("bad status '{status}' on {order_id}"))
        })?,
        tif_seconds: row.get("tif_seconds"),
        expires_at: row.get("expires_at"),
        sequence_number: row.get("sequence_number"),
        created_at: row.get("created_at"),
    })
}

const SELECT_COLUMNS: &str = r#"
    order_id, trader_id, symbol, side, order_type, limit_price_in_cents,
    quantity, filled_quantity, status, tif_seconds, expires_at,
    sequence_number, created_at
"#;

/// Persist a new order with status `PENDING` and a freshly allocated
/// per-symbol sequence number. `expires_at` is precomputed so expiration
/// queries can use the partial index.
pub async fn insert(tx: &mut Tx<'_>, draft: &OrderDraft) -> StorageResult<OrderRow> {
    let sequence_number = sequence::next(tx, &draft.symbol).await?;
    let order_id = OrderId::generate();
    let created_at = Utc::now();
    let expires_at = draft
        .tif_seconds
        .map(|secs| created_at + Duration::seconds(secs));

    sqlx::query(
        r#"
        INSERT INTO orders (
            order_id, trader_id, symbol, side, order_type, limit_price_in_cents,
            quantity, filled_quantity, status, tif_seconds, expires_at,
            sequence_number, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, 0, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(order_id.as_uuid())
    .bind(draft.trader_id.as_uuid())
    .bind(&draft.symbol)
    .bind(draft.side.as_str())
    .bind(draft.order_type.as_str())
    .bind(draft.limit_price_in_cents)
    .bind(draft.quantity)
    .bind(OrderStatus::Pending.as_str())
    .bind(draft.tif_seconds)
    .bind(expires_at)
    .bind(sequence_number)
    .bind(created_at)
    .execute(&mut **tx)
    .await?;

    Ok(OrderRow {
        order_id,
        trader_id: draft.trader_id,
        symbol: draft.symbol.clone(),
        side: draft.side,
        order_type: draft.order_type,
        limit_price_in_cents: draft.limit_price_in_cents,
        quantity: draft.quantity,
        filled_quantity: 0,
        status: OrderStatus::Pending,
        tif_seconds: draft.tif_seconds,
        expires_at,
        sequence_number,
        created_at,
    })
}

/// Fetch an order outside any transaction (router and scheduler reads).
pub async fn get_by_id(pool: &PgPool, order_id: OrderId) -> StorageResult<Option<OrderRow>> {
    let row = sqlx::query(&format!(
        "SELECT {SELECT_COLUMNS} FROM orders WHERE order_id = $1"
    ))
    .bind(order_id.as_uuid())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(order_from_row).transpose()
}

/// Fetch an order inside a transaction, without locking.
pub async fn get(tx: &mut Tx<'_>, order_id: OrderId) -> StorageResult<Option<OrderRow>> {
    let row = sqlx::query(&format!(
        "SELECT {SELECT_COLUMNS} FROM orders WHERE order_id = $1"
    ))
    .bind(order_id.as_uuid())
    .fetch_optional(&mut **tx)
    .await?;

    row.as_ref().map(order_from_row).transpose()
}

async fn get_for_update(tx: &mut Tx<'_>, order_id: OrderId) -> StorageResult<OrderRow> {
    let row = sqlx::query(&format!(
        "SELECT {SELECT_COLUMNS} FROM orders WHERE order_id = $1 FOR UPDATE"
    ))
    .bind(order_id.as_uuid())
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(StorageError::OrderNotFound(order_id))?;

    order_from_row(&row)
}

/// Credit a fill to an order. Status follows the fill: fully filled orders
/// become `FILLED`, anything else with fills becomes `PARTIALLY_FILLED`.
/// Returns the resulting status.
pub async fn apply_fill(
    tx: &mut Tx<'_>,
    order_id: OrderId,
    fill_qty: i64,
) -> StorageResult<OrderStatus> {
    let order = get_for_update(tx, order_id).await?;

    let new_filled = order.filled_quantity + fill_qty;
    if new_filled > order.quantity {
        return Err(StorageError::Invariant(format!(
            "fill of {} overfills order {} ({} of {} already filled)",
            fill_qty, order_id, order.filled_quantity, order.quantity
        )));
    }

    let new_status = if new_filled == order.quantity {
        OrderStatus::Filled
    } else {
        OrderStatus::PartiallyFilled
    };

    if !order.status.can_transition_to(new_status) {
        return Err(StorageError::InvalidTransition {
            order_id,
            from: order.status,
            to: new_status,
        });
    }

    sqlx::query(
        r#"
        UPDATE orders SET filled_quantity = $2, status = $3 WHERE order_id = $1
        "#,
    )
    .bind(order_id.as_uuid())
    .bind(new_filled)
    .bind(new_status.as_str())
    .execute(&mut **tx)
    .await?;

    Ok(new_status)
}

/// Move an order to `new_status` without touching the fill count, enforcing
/// the state machine.
pub async fn update_status(
    tx: &mut Tx<'_>,
    order_id: OrderId,
    new_status: OrderStatus,
) -> StorageResult<()> {
    let order = get_for_update(tx, order_id).await?;

    if !order.status.can_transition_to(new_status) {
        return Err(StorageError::InvalidTransition {
            order_id,
            from: order.status,
            to: new_status,
        });
    }

    sqlx::query("UPDATE orders SET status = $2 WHERE order_id = $1")
        .bind(order_id.as_uuid())
        .bind(new_status.as_str())
        .execute(&mut **tx)
        .await?;

    Ok(())
}

/// Cancel a non-terminal order with the given reason, returning the row as
/// it was before the update so the caller can release reservations and
/// remove it from the book.
pub async fn cancel(
    tx: &mut Tx<'_>,
    order_id: OrderId,
    reason: CancelReason,
) -> StorageResult<OrderRow> {
    let order = get_for_update(tx, order_id).await?;
    let new_status = reason.terminal_status();

    if !order.status.can_transition_to(new_status) {
        return Err(StorageError::InvalidTransition {
            order_id,
            from: order.status,
            to: new_status,
        });
    }

    sqlx::query(
        r#"
        UPDATE orders SET status = $2, cancel_reason = $3 WHERE order_id = $1
        "#,
    )
    .bind(order_id.as_uuid())
    .bind(new_status.as_str())
    .bind(reason.as_str())
    .execute(&mut **tx)
    .await?;

    Ok(order)
}

/// Open orders for one symbol in ascending sequence order, for rebuilding
/// the in-memory book. Within each price level this yields the original
/// arrival order, so the rebuilt book preserves price-time-sequence
/// priority.
pub async fn load_open_orders(pool: &PgPool, symbol: &str) -> StorageResult<Vec<OrderRow>> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {SELECT_COLUMNS} FROM orders
        WHERE symbol = $1 AND status IN ('OPEN', 'PARTIALLY_FILLED')
        ORDER BY sequence_number ASC
        "#
    ))
    .bind(symbol)
    .fetch_all(pool)
    .await?;

    rows.iter().map(order_from_row).collect()
}

/// Orders whose time-in-force has elapsed as of `now`.
///
/// Read-only; the actual expiration runs through the owning engine's cancel
/// path so book and store stay in lockstep.
pub async fn load_expired(
    pool: &PgPool,
    now: DateTime<Utc>,
    limit: i64,
) -> StorageResult<Vec<OrderRow>> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {SELECT_COLUMNS} FROM orders
        WHERE expires_at IS NOT NULL AND expires_at <= $1
          AND status IN ('OPEN', 'PARTIALLY_FILLED')
        ORDER BY expires_at ASC
        LIMIT $2
        "#
    ))
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(order_from_row).collect()
}
