//! Double-entry ledger.
//!
//! Trade settlements write exactly two rows, one per counterparty, whose
//! cash deltas and share deltas each sum to zero. Reservations and releases
//! are audit memos against the same trader; they do not move the balance.

use sqlx::Row;
use std::fmt;

use exchange_common::orders::{TradeId, TraderId};

use super::trades::TradeRecord;
use super::{StorageResult, Tx};

/// What a ledger row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerKind {
    TradeBuy,
    TradeSell,
    Reserve,
    Release,
    AdminAdjust,
}

impl LedgerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerKind::TradeBuy => "TRADE_BUY",
            LedgerKind::TradeSell => "TRADE_SELL",
            LedgerKind::Reserve => "RESERVE",
            LedgerKind::Release => "RELEASE",
            LedgerKind::AdminAdjust => "ADMIN_ADJUST",
        }
    }
}

impl fmt::Display for LedgerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append a single ledger row.
pub async fn post_entry(
    tx: &mut Tx<'_>,
    trade_id: Option<TradeId>,
    trader_id: TraderId,
    delta_cash_in_cents: i64,
    delta_shares: i64,
    symbol: Option<&str>,
    kind: LedgerKind,
) -> StorageResult<()> {
    sqlx::query(
        r#"
        INSERT INTO ledger_entries
            (trade_id, trader_id, delta_cash_in_cents, delta_shares, symbol, kind)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(trade_id.map(|id| id.as_uuid()))
    .bind(trader_id.as_uuid())
    .bind(delta_cash_in_cents)
    .bind(delta_shares)
    .bind(symbol)
    .bind(kind.as_str())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Post the two legs of a trade.
///
/// Buyer: `-cost` cash, `+qty` shares. Seller: `+cost` cash, `-qty` shares.
/// The pair sums to zero on both axes.
pub async fn post_trade_entries(tx: &mut Tx<'_>, trade: &TradeRecord) -> StorageResult<()> {
    let cost = trade.price_in_cents * trade.quantity;

    post_entry(
        tx,
        Some(trade.trade_id),
        trade.buyer_id,
        -cost,
        trade.quantity,
        Some(&trade.symbol),
        LedgerKind::TradeBuy,
    )
    .await?;

    post_entry(
        tx,
        Some(trade.trade_id),
        trade.seller_id,
        cost,
        -trade.quantity,
        Some(&trade.symbol),
        LedgerKind::TradeSell,
    )
    .await?;

    Ok(())
}

/// Sum of `(delta_cash, delta_shares)` over the trade-leg rows of one
/// trade. Used by invariant checks and the integration tests; both values
/// must be zero.
pub async fn trade_leg_sums(tx: &mut Tx<'_>, trade_id: TradeId) -> StorageResult<(i64, i64)> {
    let row = sqlx::query(
        r#"
        SELECT COALESCE(SUM(delta_cash_in_cents), 0) AS cash,
               COALESCE(SUM(delta_shares), 0) AS shares
        FROM ledger_entries
        WHERE trade_id = $1 AND kind IN ('TRADE_BUY', 'TRADE_SELL')
        "#,
    )
    .bind(trade_id.as_uuid())
    .fetch_one(&mut **tx)
    .await?;

    Ok((row.get("cash"), row.get("shares")))
}
