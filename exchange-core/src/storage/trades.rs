//! Trade store. Trades are immutable facts; this module inserts and serves
//! the last-price read used by recovery.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use exchange_common::orders::{OrderId, TradeId, TraderId};

use super::{StorageResult, Tx};

/// One executed fill, as persisted.
#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub trade_id: TradeId,
    pub symbol: String,
    pub price_in_cents: i64,
    pub quantity: i64,
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub buyer_id: TraderId,
    pub seller_id: TraderId,
    pub maker_order_id: OrderId,
    pub taker_order_id: OrderId,
    pub executed_at: DateTime<Utc>,
}

/// Persist a trade row.
pub async fn insert(tx: &mut Tx<'_>, trade: &TradeRecord) -> StorageResult<()> {
    sqlx::query(
        r#"
        INSERT INTO trades (
            trade_id, symbol, price_in_cents, quantity,
            buy_order_id, sell_order_id, buyer_id, seller_id,
            maker_order_id, taker_order_id, executed_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(trade.trade_id.as_uuid())
    .bind(&trade.symbol)
    .bind(trade.price_in_cents)
    .bind(trade.quantity)
    .bind(trade.buy_order_id.as_uuid())
    .bind(trade.sell_order_id.as_uuid())
    .bind(trade.buyer_id.as_uuid())
    .bind(trade.seller_id.as_uuid())
    .bind(trade.maker_order_id.as_uuid())
    .bind(trade.taker_order_id.as_uuid())
    .bind(trade.executed_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Price of the most recent trade on a symbol, if any.
pub async fn last_price(pool: &PgPool, symbol: &str) -> StorageResult<Option<i64>> {
    let row = sqlx::query(
        r#"
        SELECT price_in_cents FROM trades
        WHERE symbol = $1
        ORDER BY executed_at DESC
        LIMIT 1
        "#,
    )
    .bind(symbol)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.get("price_in_cents")))
}
