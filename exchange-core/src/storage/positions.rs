//! Position store: share holdings, share reservations, and average cost.
//!
//! Quantities never go negative: sells require available shares (held minus
//! reserved by that trader's open sell orders). Average cost changes only on
//! buy fills, using banker's rounding; realised P&L is derived elsewhere,
//! never stored.

use sqlx::Row;
use std::cmp::Ordering;

use exchange_common::orders::TraderId;

use super::ledger::{self, LedgerKind};
use super::{StorageError, StorageResult, Tx};

/// One row of `positions`.
#[derive(Debug, Clone)]
pub struct Position {
    pub trader_id: TraderId,
    pub symbol: String,
    pub quantity: i64,
    pub reserved_shares: i64,
    pub avg_cost_in_cents: i64,
}

impl Position {
    /// Shares not earmarked by open sell orders.
    pub fn available_shares(&self) -> i64 {
        self.quantity - self.reserved_shares
    }
}

/// Integer division rounding half to even (banker's rounding).
///
/// The only rounding rule in the exchange; applied to average cost.
fn div_round_half_even(numerator: i64, denominator: i64) -> i64 {
    debug_assert!(denominator > 0);
    debug_assert!(numerator >= 0);

    let quotient = numerator / denominator;
    let remainder = numerator % denominator;

    match (remainder * 2).cmp(&denominator) {
        Ordering::Less => quotient,
        Ordering::Greater => quotient + 1,
        Ordering::Equal => {
            if quotient % 2 == 0 {
                quotient
            } else {
                quotient + 1
            }
        }
    }
}

fn position_from_row(row: &sqlx::postgres::PgRow) -> Position {
    Position {
        trader_id: TraderId(row.get("trader_id")),
        symbol: row.get("symbol"),
        quantity: row.get("quantity"),
        reserved_shares: row.get("reserved_shares"),
        avg_cost_in_cents: row.get("avg_cost_in_cents"),
    }
}

/// Fetch a position without locking.
pub async fn get(
    tx: &mut Tx<'_>,
    trader_id: TraderId,
    symbol: &str,
) -> StorageResult<Option<Position>> {
    let row = sqlx::query(
        r#"
        SELECT trader_id, symbol, quantity, reserved_shares, avg_cost_in_cents
        FROM positions WHERE trader_id = $1 AND symbol = $2
        "#,
    )
    .bind(trader_id.as_uuid())
    .bind(symbol)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(row.as_ref().map(position_from_row))
}

async fn get_for_update(
    tx: &mut Tx<'_>,
    trader_id: TraderId,
    symbol: &str,
) -> StorageResult<Option<Position>> {
    let row = sqlx::query(
        r#"
        SELECT trader_id, symbol, quantity, reserved_shares, avg_cost_in_cents
        FROM positions WHERE trader_id = $1 AND symbol = $2
        FOR UPDATE
        "#,
    )
    .bind(trader_id.as_uuid())
    .bind(symbol)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(row.as_ref().map(position_from_row))
}

/// Earmark shares against an open sell order.
///
/// Fails with `InsufficientShares` when available shares fall short; admins
/// get no bypass here.
pub async fn reserve_shares(
    tx: &mut Tx<'_>,
    trader_id: TraderId,
    symbol: &str,
    qty: i64,
) -> StorageResult<()> {
    let position = get_for_update(tx, trader_id, symbol).await?;
    let available = position.as_ref().map(|p| p.available_shares()).unwrap_or(0);

    if available < qty {
        return Err(StorageError::InsufficientShares {
            symbol: symbol.to_string(),
            needed: qty,
            available,
        });
    }

    sqlx::query(
        r#"
        UPDATE positions SET reserved_shares = reserved_shares + $3
        WHERE trader_id = $1 AND symbol = $2
        "#,
    )
    .bind(trader_id.as_uuid())
    .bind(symbol)
    .bind(qty)
    .execute(&mut **tx)
    .await?;

    ledger::post_entry(tx, None, trader_id, 0, -qty, Some(symbol), LedgerKind::Reserve).await?;
    Ok(())
}

/// Return earmarked shares to the available pool.
pub async fn release_shares(
    tx: &mut Tx<'_>,
    trader_id: TraderId,
    symbol: &str,
    qty: i64,
) -> StorageResult<()> {
    if qty == 0 {
        return Ok(());
    }

    let position = get_for_update(tx, trader_id, symbol)
        .await?
        .ok_or_else(|| {
            StorageError::Invariant(format!(
                "release of {} shares of {} for trader {} with no position",
                qty, symbol, trader_id
            ))
        })?;

    if position.reserved_shares < qty {
        return Err(StorageError::Invariant(format!(
            "release of {} shares exceeds reservation of {} for trader {} on {}",
            qty, position.reserved_shares, trader_id, symbol
        )));
    }

    sqlx::query(
        r#"
        UPDATE positions SET reserved_shares = reserved_shares - $3
        WHERE trader_id = $1 AND symbol = $2
        "#,
    )
    .bind(trader_id.as_uuid())
    .bind(symbol)
    .bind(qty)
    .execute(&mut **tx)
    .await?;

    ledger::post_entry(tx, None, trader_id, 0, qty, Some(symbol), LedgerKind::Release).await?;
    Ok(())
}

/// Apply a buy fill: quantity grows, average cost re-weighted with banker's
/// rounding. Creates the position on the first fill.
pub async fn apply_buy_fill(
    tx: &mut Tx<'_>,
    trader_id: TraderId,
    symbol: &str,
    qty: i64,
    price_in_cents: i64,
) -> StorageResult<()> {
    match get_for_update(tx, trader_id, symbol).await? {
        Some(position) => {
            let new_qty = position.quantity + qty;
            let new_avg = div_round_half_even(
                position.quantity * position.avg_cost_in_cents + qty * price_in_cents,
                new_qty,
            );

            sqlx::query(
                r#"
                UPDATE positions SET quantity = $3, avg_cost_in_cents = $4
                WHERE trader_id = $1 AND symbol = $2
                "#,
            )
            .bind(trader_id.as_uuid())
            .bind(symbol)
            .bind(new_qty)
            .bind(new_avg)
            .execute(&mut **tx)
            .await?;
        }
        None => {
            sqlx::query(
                r#"
                INSERT INTO positions
                    (trader_id, symbol, quantity, reserved_shares, avg_cost_in_cents)
                VALUES ($1, $2, $3, 0, $4)
                "#,
            )
            .bind(trader_id.as_uuid())
            .bind(symbol)
            .bind(qty)
            .bind(price_in_cents)
            .execute(&mut **tx)
            .await?;
        }
    }

    Ok(())
}

/// Apply a sell fill: both the holding and the reservation shrink; average
/// cost is untouched.
pub async fn apply_sell_fill(
    tx: &mut Tx<'_>,
    trader_id: TraderId,
    symbol: &str,
    qty: i64,
) -> StorageResult<()> {
    let position = get_for_update(tx, trader_id, symbol)
        .await?
        .ok_or_else(|| {
            StorageError::Invariant(format!(
                "sell fill of {} {} for trader {} with no position",
                qty, symbol, trader_id
            ))
        })?;

    if position.quantity < qty || position.reserved_shares < qty {
        return Err(StorageError::Invariant(format!(
            "sell fill of {} exceeds held {} / reserved {} for trader {} on {}",
            qty, position.quantity, position.reserved_shares, trader_id, symbol
        )));
    }

    sqlx::query(
        r#"
        UPDATE positions
        SET quantity = quantity - $3, reserved_shares = reserved_shares - $3
        WHERE trader_id = $1 AND symbol = $2
        "#,
    )
    .bind(trader_id.as_uuid())
    .bind(symbol)
    .bind(qty)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
