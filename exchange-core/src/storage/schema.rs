//! Schema bootstrap for the exchange tables.
//!
//! Creates the tables on startup if they do not exist. All monetary columns
//! are integer cents, all quantities are whole shares, all timestamps UTC.

use sqlx::PgPool;
use tracing::info;

/// Create all exchange tables and indexes if missing.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS trader_accounts (
            trader_id UUID PRIMARY KEY,
            active BOOLEAN NOT NULL DEFAULT TRUE,
            admin BOOLEAN NOT NULL DEFAULT FALSE,
            balance_in_cents BIGINT NOT NULL DEFAULT 0,
            reserved_cash_in_cents BIGINT NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS positions (
            trader_id UUID NOT NULL,
            symbol VARCHAR(32) NOT NULL,
            quantity BIGINT NOT NULL DEFAULT 0,
            reserved_shares BIGINT NOT NULL DEFAULT 0,
            avg_cost_in_cents BIGINT NOT NULL DEFAULT 0,
            PRIMARY KEY (trader_id, symbol)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS orders (
            order_id UUID PRIMARY KEY,
            trader_id UUID NOT NULL,
            symbol VARCHAR(32) NOT NULL,
            side VARCHAR(4) NOT NULL,
            order_type VARCHAR(8) NOT NULL,
            limit_price_in_cents BIGINT,
            quantity BIGINT NOT NULL,
            filled_quantity BIGINT NOT NULL DEFAULT 0,
            status VARCHAR(16) NOT NULL,
            tif_seconds BIGINT,
            expires_at TIMESTAMPTZ,
            cancel_reason VARCHAR(16),
            sequence_number BIGINT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_orders_open_by_symbol
        ON orders (symbol, sequence_number)
        WHERE status IN ('OPEN', 'PARTIALLY_FILLED')
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_orders_expiry
        ON orders (expires_at)
        WHERE status IN ('OPEN', 'PARTIALLY_FILLED') AND expires_at IS NOT NULL
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS trades (
            trade_id UUID PRIMARY KEY,
            symbol VARCHAR(32) NOT NULL,
            price_in_cents BIGINT NOT NULL,
            quantity BIGINT NOT NULL,
            buy_order_id UUID NOT NULL,
            sell_order_id UUID NOT NULL,
            buyer_id UUID NOT NULL,
            seller_id UUID NOT NULL,
            maker_order_id UUID NOT NULL,
            taker_order_id UUID NOT NULL,
            executed_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            CHECK (quantity > 0),
            CHECK (price_in_cents > 0)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_trades_symbol_time
        ON trades (symbol, executed_at)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ledger_entries (
            entry_id BIGSERIAL PRIMARY KEY,
            trade_id UUID,
            trader_id UUID NOT NULL,
            delta_cash_in_cents BIGINT NOT NULL DEFAULT 0,
            delta_shares BIGINT NOT NULL DEFAULT 0,
            symbol VARCHAR(32),
            kind VARCHAR(16) NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_ledger_trader
        ON ledger_entries (trader_id, created_at)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sequence_counters (
            symbol VARCHAR(32) PRIMARY KEY,
            next_sequence_number BIGINT NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS market_data_outbox (
            event_id BIGSERIAL PRIMARY KEY,
            symbol VARCHAR(32) NOT NULL,
            event_type VARCHAR(16) NOT NULL,
            payload JSONB NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            published_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_outbox_unpublished
        ON market_data_outbox (created_at)
        WHERE published_at IS NULL
        "#,
    )
    .execute(pool)
    .await?;

    info!("Exchange schema ensured");
    Ok(())
}
