//! Trader account store: cash balances and cash reservations.
//!
//! Available cash is `balance_in_cents - reserved_cash_in_cents`. Admin
//! accounts bypass the cash-sufficiency check on buys; their balance may go
//! negative. Rows are locked (`FOR UPDATE`) before every mutation so
//! concurrent engines on different symbols serialize per trader.

use chrono::{DateTime, Utc};
use sqlx::Row;

use exchange_common::orders::TraderId;

use super::ledger::{self, LedgerKind};
use super::{StorageError, StorageResult, Tx};

/// One row of `trader_accounts`.
#[derive(Debug, Clone)]
pub struct TraderAccount {
    pub trader_id: TraderId,
    pub active: bool,
    pub admin: bool,
    pub balance_in_cents: i64,
    pub reserved_cash_in_cents: i64,
    pub created_at: DateTime<Utc>,
}

impl TraderAccount {
    /// Cash not earmarked by open buy orders.
    pub fn available_in_cents(&self) -> i64 {
        self.balance_in_cents - self.reserved_cash_in_cents
    }
}

fn account_from_row(row: &sqlx::postgres::PgRow) -> TraderAccount {
    TraderAccount {
        trader_id: TraderId(row.get("trader_id")),
        active: row.get("active"),
        admin: row.get("admin"),
        balance_in_cents: row.get("balance_in_cents"),
        reserved_cash_in_cents: row.get("reserved_cash_in_cents"),
        created_at: row.get("created_at"),
    }
}

/// Create a trader account with an opening balance, posting the matching
/// `ADMIN_ADJUST` ledger entry.
pub async fn create(
    tx: &mut Tx<'_>,
    trader_id: TraderId,
    admin: bool,
    opening_balance_in_cents: i64,
) -> StorageResult<()> {
    sqlx::query(
        r#"
        INSERT INTO trader_accounts (trader_id, active, admin, balance_in_cents)
        VALUES ($1, TRUE, $2, $3)
        "#,
    )
    .bind(trader_id.as_uuid())
    .bind(admin)
    .bind(opening_balance_in_cents)
    .execute(&mut **tx)
    .await?;

    if opening_balance_in_cents != 0 {
        ledger::post_entry(
            tx,
            None,
            trader_id,
            opening_balance_in_cents,
            0,
            None,
            LedgerKind::AdminAdjust,
        )
        .await?;
    }

    Ok(())
}

/// Fetch an account without locking.
pub async fn get(tx: &mut Tx<'_>, trader_id: TraderId) -> StorageResult<Option<TraderAccount>> {
    let row = sqlx::query(
        r#"
        SELECT trader_id, active, admin, balance_in_cents, reserved_cash_in_cents, created_at
        FROM trader_accounts WHERE trader_id = $1
        "#,
    )
    .bind(trader_id.as_uuid())
    .fetch_optional(&mut **tx)
    .await?;

    Ok(row.as_ref().map(account_from_row))
}

/// Fetch an account with a row lock, failing if it does not exist or is
/// inactive.
pub async fn get_active_for_update(
    tx: &mut Tx<'_>,
    trader_id: TraderId,
) -> StorageResult<TraderAccount> {
    let row = sqlx::query(
        r#"
        SELECT trader_id, active, admin, balance_in_cents, reserved_cash_in_cents, created_at
        FROM trader_accounts WHERE trader_id = $1
        FOR UPDATE
        "#,
    )
    .bind(trader_id.as_uuid())
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(StorageError::TraderNotFound(trader_id))?;

    let account = account_from_row(&row);
    if !account.active {
        return Err(StorageError::TraderInactive(trader_id));
    }
    Ok(account)
}

/// Earmark cash against an open buy order.
///
/// Fails with `InsufficientCash` unless the trader is an admin. Writes a
/// `RESERVE` ledger entry.
pub async fn reserve_cash(
    tx: &mut Tx<'_>,
    trader_id: TraderId,
    cents: i64,
) -> StorageResult<()> {
    let account = get_active_for_update(tx, trader_id).await?;

    if !account.admin && account.available_in_cents() < cents {
        return Err(StorageError::InsufficientCash {
            needed_in_cents: cents,
            available_in_cents: account.available_in_cents(),
        });
    }

    sqlx::query(
        r#"
        UPDATE trader_accounts
        SET reserved_cash_in_cents = reserved_cash_in_cents + $2
        WHERE trader_id = $1
        "#,
    )
    .bind(trader_id.as_uuid())
    .bind(cents)
    .execute(&mut **tx)
    .await?;

    ledger::post_entry(tx, None, trader_id, -cents, 0, None, LedgerKind::Reserve).await?;
    Ok(())
}

/// Return earmarked cash to the available balance.
///
/// Must not release more than is currently reserved.
pub async fn release_cash(
    tx: &mut Tx<'_>,
    trader_id: TraderId,
    cents: i64,
) -> StorageResult<()> {
    if cents == 0 {
        return Ok(());
    }

    let account = get_active_for_update(tx, trader_id).await?;
    if account.reserved_cash_in_cents < cents {
        return Err(StorageError::Invariant(format!(
            "release of {} cents exceeds reservation of {} for trader {}",
            cents, account.reserved_cash_in_cents, trader_id
        )));
    }

    sqlx::query(
        r#"
        UPDATE trader_accounts
        SET reserved_cash_in_cents = reserved_cash_in_cents - $2
        WHERE trader_id = $1
        "#,
    )
    .bind(trader_id.as_uuid())
    .bind(cents)
    .execute(&mut **tx)
    .await?;

    ledger::post_entry(tx, None, trader_id, cents, 0, None, LedgerKind::Release).await?;
    Ok(())
}

/// Buyer side of a settlement: the trade cost moves out of the reservation
/// and out of the balance.
pub async fn settle_buy(tx: &mut Tx<'_>, buyer: TraderId, cost_in_cents: i64) -> StorageResult<()> {
    let account = get_active_for_update(tx, buyer).await?;
    if account.reserved_cash_in_cents < cost_in_cents {
        return Err(StorageError::Invariant(format!(
            "settlement of {} cents exceeds reservation of {} for buyer {}",
            cost_in_cents, account.reserved_cash_in_cents, buyer
        )));
    }

    sqlx::query(
        r#"
        UPDATE trader_accounts
        SET balance_in_cents = balance_in_cents - $2,
            reserved_cash_in_cents = reserved_cash_in_cents - $2
        WHERE trader_id = $1
        "#,
    )
    .bind(buyer.as_uuid())
    .bind(cost_in_cents)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Seller side of a settlement: proceeds are credited to the balance.
pub async fn settle_sell(
    tx: &mut Tx<'_>,
    seller: TraderId,
    proceeds_in_cents: i64,
) -> StorageResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE trader_accounts
        SET balance_in_cents = balance_in_cents + $2
        WHERE trader_id = $1
        "#,
    )
    .bind(seller.as_uuid())
    .bind(proceeds_in_cents)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StorageError::TraderNotFound(seller));
    }
    Ok(())
}
