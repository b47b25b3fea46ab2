//! End-to-end matching scenarios.
//!
//! These tests exercise the full submit flow against a real PostgreSQL
//! database: Router -> SymbolProcessor -> stores -> commit -> book.
//!
//! # Setup
//!
//! 1. Point `DATABASE_URL` at a scratch database:
//!    ```bash
//!    export DATABASE_URL=postgresql://localhost/exchange_test
//!    ```
//!
//! 2. Run:
//!    ```bash
//!    cargo test -p exchange-core --test matching_scenarios
//!    ```
//!
//! Tests are skipped when `DATABASE_URL` is not set. Each test uses a
//! fresh random symbol and fresh traders, so runs do not interfere with
//! each other or require cleanup.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tokio::sync::broadcast;
use uuid::Uuid;

use exchange_common::orders::{
    CancelOutcome, OrderStatus, OrderType, RejectReason, Side, SubmitRequest, TraderId,
};
use exchange_common::symbols::SymbolRegistry;

use exchange_core::config::EngineSettings;
use exchange_core::engine::{recover_books, ExpirationScheduler, Router};
use exchange_core::storage::{accounts, schema};

// ============================================================================
// Test Helpers
// ============================================================================

/// Skip test if no database is configured
macro_rules! require_database {
    () => {
        match std::env::var("DATABASE_URL") {
            Ok(url) => url,
            Err(_) => {
                eprintln!("Skipping: DATABASE_URL not set");
                return;
            }
        }
    };
}

async fn connect(url: &str) -> PgPool {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .expect("failed to connect to test database");
    schema::ensure_schema(&pool).await.expect("schema");
    pool
}

/// A unique symbol per test keeps runs independent.
fn fresh_symbol() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("@test_{}", &suffix[..12])
}

async fn start_exchange(pool: &PgPool, symbol: &str) -> Arc<Router> {
    let registry = SymbolRegistry::new(vec![symbol.to_string()]).unwrap();
    Arc::new(
        recover_books(pool, &registry, &EngineSettings::default())
            .await
            .expect("recovery"),
    )
}

async fn create_trader(pool: &PgPool, cash_in_cents: i64) -> TraderId {
    let trader = TraderId::generate();
    let mut tx = pool.begin().await.unwrap();
    accounts::create(&mut tx, trader, false, cash_in_cents)
        .await
        .unwrap();
    tx.commit().await.unwrap();
    trader
}

async fn seed_shares(pool: &PgPool, trader: TraderId, symbol: &str, qty: i64, avg_cost: i64) {
    sqlx::query(
        "INSERT INTO positions (trader_id, symbol, quantity, reserved_shares, avg_cost_in_cents)
         VALUES ($1, $2, $3, 0, $4)",
    )
    .bind(trader.as_uuid())
    .bind(symbol)
    .bind(qty)
    .bind(avg_cost)
    .execute(pool)
    .await
    .unwrap();
}

async fn account_state(pool: &PgPool, trader: TraderId) -> (i64, i64) {
    let row = sqlx::query(
        "SELECT balance_in_cents, reserved_cash_in_cents FROM trader_accounts WHERE trader_id = $1",
    )
    .bind(trader.as_uuid())
    .fetch_one(pool)
    .await
    .unwrap();
    (row.get("balance_in_cents"), row.get("reserved_cash_in_cents"))
}

/// (quantity, reserved_shares, avg_cost_in_cents); zeros when no position.
async fn position_state(pool: &PgPool, trader: TraderId, symbol: &str) -> (i64, i64, i64) {
    let row = sqlx::query(
        "SELECT quantity, reserved_shares, avg_cost_in_cents FROM positions
         WHERE trader_id = $1 AND symbol = $2",
    )
    .bind(trader.as_uuid())
    .bind(symbol)
    .fetch_optional(pool)
    .await
    .unwrap();
    match row {
        Some(row) => (
            row.get("quantity"),
            row.get("reserved_shares"),
            row.get("avg_cost_in_cents"),
        ),
        None => (0, 0, 0),
    }
}

async fn trade_count(pool: &PgPool, symbol: &str) -> i64 {
    sqlx::query("SELECT COUNT(*) AS n FROM trades WHERE symbol = $1")
        .bind(symbol)
        .fetch_one(pool)
        .await
        .unwrap()
        .get("n")
}

async fn outbox_count(pool: &PgPool, symbol: &str, event_type: &str) -> i64 {
    sqlx::query(
        "SELECT COUNT(*) AS n FROM market_data_outbox WHERE symbol = $1 AND event_type = $2",
    )
    .bind(symbol)
    .bind(event_type)
    .fetch_one(pool)
    .await
    .unwrap()
    .get("n")
}

async fn order_status(pool: &PgPool, order_id: exchange_common::orders::OrderId) -> String {
    sqlx::query("SELECT status FROM orders WHERE order_id = $1")
        .bind(order_id.as_uuid())
        .fetch_one(pool)
        .await
        .unwrap()
        .get("status")
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_limit_orders_cross_and_settle() {
    let url = require_database!();
    let pool = connect(&url).await;
    let symbol = fresh_symbol();
    let router = start_exchange(&pool, &symbol).await;

    let seller = create_trader(&pool, 0).await;
    let buyer = create_trader(&pool, 10_000).await;
    seed_shares(&pool, seller, &symbol, 10, 400).await;

    let sell = router
        .submit(SubmitRequest::limit(seller, &symbol, Side::Sell, 10, 500))
        .await;
    assert_eq!(sell.status, OrderStatus::Open);

    let buy = router
        .submit(SubmitRequest::limit(buyer, &symbol, Side::Buy, 10, 500))
        .await;
    assert_eq!(buy.status, OrderStatus::Filled);
    assert_eq!(buy.fills.len(), 1);
    assert_eq!(buy.fills[0].quantity, 10);
    assert_eq!(buy.fills[0].price_in_cents, 500);
    assert_eq!(buy.fills[0].maker_order_id, sell.order_id.unwrap());

    // Seller: +5000 cash, -10 shares. Buyer: -5000 cash, +10 shares.
    assert_eq!(account_state(&pool, seller).await, (5_000, 0));
    assert_eq!(account_state(&pool, buyer).await, (5_000, 0));
    assert_eq!(position_state(&pool, seller, &symbol).await, (0, 0, 400));
    assert_eq!(position_state(&pool, buyer, &symbol).await, (10, 0, 500));

    assert_eq!(order_status(&pool, sell.order_id.unwrap()).await, "FILLED");
    assert_eq!(trade_count(&pool, &symbol).await, 1);
    assert_eq!(outbox_count(&pool, &symbol, "TRADE_EXECUTED").await, 1);

    // Zero-sum ledger over the trade legs
    let sums = sqlx::query(
        "SELECT COALESCE(SUM(delta_cash_in_cents), 0) AS cash,
                COALESCE(SUM(delta_shares), 0) AS shares
         FROM ledger_entries
         WHERE kind IN ('TRADE_BUY', 'TRADE_SELL') AND symbol = $1",
    )
    .bind(&symbol)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(sums.get::<i64, _>("cash"), 0);
    assert_eq!(sums.get::<i64, _>("shares"), 0);

    router.shutdown().await;
}

#[tokio::test]
async fn test_self_trade_prevented_both_orders_rest() {
    let url = require_database!();
    let pool = connect(&url).await;
    let symbol = fresh_symbol();
    let router = start_exchange(&pool, &symbol).await;

    let trader = create_trader(&pool, 10_000).await;
    seed_shares(&pool, trader, &symbol, 10, 0).await;

    let sell = router
        .submit(SubmitRequest::limit(trader, &symbol, Side::Sell, 10, 500))
        .await;
    assert_eq!(sell.status, OrderStatus::Open);

    let buy = router
        .submit(SubmitRequest::limit(trader, &symbol, Side::Buy, 10, 500))
        .await;
    assert_eq!(buy.status, OrderStatus::Open);
    assert!(buy.fills.is_empty());

    assert_eq!(trade_count(&pool, &symbol).await, 0);

    let snapshot = router.snapshot(&symbol).await.unwrap();
    assert_eq!(snapshot.bids.get(&500), Some(&10));
    assert_eq!(snapshot.asks.get(&500), Some(&10));

    router.shutdown().await;
}

#[tokio::test]
async fn test_market_buy_walks_book_and_releases_cushion() {
    let url = require_database!();
    let pool = connect(&url).await;
    let symbol = fresh_symbol();
    let router = start_exchange(&pool, &symbol).await;

    let maker_low = create_trader(&pool, 0).await;
    let maker_high = create_trader(&pool, 0).await;
    let buyer = create_trader(&pool, 10_000).await;
    seed_shares(&pool, maker_low, &symbol, 3, 0).await;
    seed_shares(&pool, maker_high, &symbol, 7, 0).await;

    router
        .submit(SubmitRequest::limit(maker_low, &symbol, Side::Sell, 3, 500))
        .await;
    router
        .submit(SubmitRequest::limit(maker_high, &symbol, Side::Sell, 7, 510))
        .await;

    let buy = router
        .submit(SubmitRequest::market(buyer, &symbol, Side::Buy, 5))
        .await;
    assert_eq!(buy.status, OrderStatus::Filled);
    assert_eq!(buy.fills.len(), 2);
    assert_eq!((buy.fills[0].quantity, buy.fills[0].price_in_cents), (3, 500));
    assert_eq!((buy.fills[1].quantity, buy.fills[1].price_in_cents), (2, 510));

    // Total cost 2520; the cushion over-reservation is fully released.
    let (balance, reserved) = account_state(&pool, buyer).await;
    assert_eq!(balance, 10_000 - 2_520);
    assert_eq!(reserved, 0);

    // Average cost 2520 / 5 = 504 exactly under banker's rounding.
    assert_eq!(position_state(&pool, buyer, &symbol).await, (5, 0, 504));

    assert_eq!(trade_count(&pool, &symbol).await, 2);

    router.shutdown().await;
}

#[tokio::test]
async fn test_market_buy_empty_book_rejected_no_liquidity() {
    let url = require_database!();
    let pool = connect(&url).await;
    let symbol = fresh_symbol();
    let router = start_exchange(&pool, &symbol).await;

    let buyer = create_trader(&pool, 10_000).await;
    let reply = router
        .submit(SubmitRequest::market(buyer, &symbol, Side::Buy, 5))
        .await;

    assert_eq!(reply.status, OrderStatus::Rejected);
    assert_eq!(reply.rejection_reason, Some(RejectReason::NoLiquidity));
    assert!(reply.order_id.is_none());

    // Nothing persisted, nothing reserved
    assert_eq!(account_state(&pool, buyer).await, (10_000, 0));
    let orders: i64 = sqlx::query("SELECT COUNT(*) AS n FROM orders WHERE symbol = $1")
        .bind(&symbol)
        .fetch_one(&pool)
        .await
        .unwrap()
        .get("n");
    assert_eq!(orders, 0);

    router.shutdown().await;
}

#[tokio::test]
async fn test_ioc_sell_above_best_bid_cancelled_without_fills() {
    let url = require_database!();
    let pool = connect(&url).await;
    let symbol = fresh_symbol();
    let router = start_exchange(&pool, &symbol).await;

    let bidder = create_trader(&pool, 10_000).await;
    let seller = create_trader(&pool, 0).await;
    seed_shares(&pool, seller, &symbol, 5, 0).await;

    router
        .submit(SubmitRequest::limit(bidder, &symbol, Side::Buy, 5, 490))
        .await;

    let mut ioc = SubmitRequest::limit(seller, &symbol, Side::Sell, 5, 500);
    ioc.order_type = OrderType::Ioc;
    let reply = router.submit(ioc).await;

    assert_eq!(reply.status, OrderStatus::Cancelled);
    assert!(reply.fills.is_empty());

    // Share reservation restored
    assert_eq!(position_state(&pool, seller, &symbol).await, (5, 0, 0));
    assert_eq!(trade_count(&pool, &symbol).await, 0);

    router.shutdown().await;
}

#[tokio::test]
async fn test_partial_market_fill_cancels_remainder() {
    let url = require_database!();
    let pool = connect(&url).await;
    let symbol = fresh_symbol();
    let router = start_exchange(&pool, &symbol).await;

    let maker = create_trader(&pool, 0).await;
    let buyer = create_trader(&pool, 100_000).await;
    seed_shares(&pool, maker, &symbol, 3, 0).await;

    router
        .submit(SubmitRequest::limit(maker, &symbol, Side::Sell, 3, 500))
        .await;

    let reply = router
        .submit(SubmitRequest::market(buyer, &symbol, Side::Buy, 10))
        .await;

    assert_eq!(reply.status, OrderStatus::Cancelled);
    assert_eq!(reply.fills.len(), 1);
    assert_eq!(reply.fills[0].quantity, 3);

    assert_eq!(
        order_status(&pool, reply.order_id.unwrap()).await,
        "CANCELLED"
    );
    assert_eq!(outbox_count(&pool, &symbol, "ORDER_CANCELLED").await, 1);

    // Paid 1500, everything else released
    assert_eq!(account_state(&pool, buyer).await, (100_000 - 1_500, 0));
    assert_eq!(position_state(&pool, buyer, &symbol).await, (3, 0, 500));

    router.shutdown().await;
}

#[tokio::test]
async fn test_insufficient_cash_and_shares_rejections() {
    let url = require_database!();
    let pool = connect(&url).await;
    let symbol = fresh_symbol();
    let router = start_exchange(&pool, &symbol).await;

    let poor = create_trader(&pool, 100).await;
    let reply = router
        .submit(SubmitRequest::limit(poor, &symbol, Side::Buy, 10, 500))
        .await;
    assert_eq!(reply.rejection_reason, Some(RejectReason::InsufficientCash));
    assert_eq!(account_state(&pool, poor).await, (100, 0));

    let shareless = create_trader(&pool, 10_000).await;
    let reply = router
        .submit(SubmitRequest::limit(shareless, &symbol, Side::Sell, 10, 500))
        .await;
    assert_eq!(
        reply.rejection_reason,
        Some(RejectReason::InsufficientShares)
    );

    let reply = router
        .submit(SubmitRequest::limit(
            TraderId::generate(),
            &symbol,
            Side::Buy,
            1,
            500,
        ))
        .await;
    assert_eq!(reply.rejection_reason, Some(RejectReason::InactiveTrader));

    let reply = router
        .submit(SubmitRequest::limit(poor, "@nosuchsymbol", Side::Buy, 1, 1))
        .await;
    assert_eq!(reply.rejection_reason, Some(RejectReason::UnknownSymbol));

    router.shutdown().await;
}

#[tokio::test]
async fn test_cancel_restores_reservation_exactly() {
    let url = require_database!();
    let pool = connect(&url).await;
    let symbol = fresh_symbol();
    let router = start_exchange(&pool, &symbol).await;

    let buyer = create_trader(&pool, 10_000).await;
    let reply = router
        .submit(SubmitRequest::limit(buyer, &symbol, Side::Buy, 10, 500))
        .await;
    let order_id = reply.order_id.unwrap();

    assert_eq!(account_state(&pool, buyer).await, (10_000, 5_000));

    let outcome = router.cancel(buyer, order_id).await;
    assert_eq!(outcome, CancelOutcome::Cancelled);
    assert_eq!(account_state(&pool, buyer).await, (10_000, 0));
    assert_eq!(order_status(&pool, order_id).await, "CANCELLED");

    // Cancelling again reports the terminal state
    assert_eq!(
        router.cancel(buyer, order_id).await,
        CancelOutcome::AlreadyTerminal
    );

    // Another trader cannot cancel what it does not own
    let other = create_trader(&pool, 0).await;
    let reply = router
        .submit(SubmitRequest::limit(buyer, &symbol, Side::Buy, 1, 400))
        .await;
    assert_eq!(
        router.cancel(other, reply.order_id.unwrap()).await,
        CancelOutcome::Unknown
    );

    router.shutdown().await;
}

#[tokio::test]
async fn test_tif_expiry_releases_reservation() {
    let url = require_database!();
    let pool = connect(&url).await;
    let symbol = fresh_symbol();
    let router = start_exchange(&pool, &symbol).await;

    let (shutdown_tx, _) = broadcast::channel(1);
    let scheduler = ExpirationScheduler::new(
        pool.clone(),
        Arc::clone(&router),
        EngineSettings::default(),
    );
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_tx.subscribe()));

    let buyer = create_trader(&pool, 10_000).await;
    let reply = router
        .submit(SubmitRequest::limit(buyer, &symbol, Side::Buy, 10, 500).with_tif(1))
        .await;
    let order_id = reply.order_id.unwrap();
    assert_eq!(account_state(&pool, buyer).await, (10_000, 5_000));

    // One tick late is allowed; three seconds is comfortably past that.
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(order_status(&pool, order_id).await, "EXPIRED");
    assert_eq!(account_state(&pool, buyer).await, (10_000, 0));
    assert_eq!(outbox_count(&pool, &symbol, "ORDER_EXPIRED").await, 1);

    let snapshot = router.snapshot(&symbol).await.unwrap();
    assert!(snapshot.bids.is_empty());

    let _ = shutdown_tx.send(());
    let _ = scheduler_task.await;
    router.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_buyers_drain_one_seller() {
    let url = require_database!();
    let pool = connect(&url).await;
    let symbol = fresh_symbol();
    let router = start_exchange(&pool, &symbol).await;

    let seller = create_trader(&pool, 0).await;
    seed_shares(&pool, seller, &symbol, 100, 0).await;
    let sell = router
        .submit(SubmitRequest::limit(seller, &symbol, Side::Sell, 100, 500))
        .await;
    let sell_order_id = sell.order_id.unwrap();

    let mut buyers = Vec::new();
    for _ in 0..100 {
        buyers.push(create_trader(&pool, 500).await);
    }

    let mut handles = Vec::new();
    for buyer in buyers {
        let router = Arc::clone(&router);
        let symbol = symbol.clone();
        handles.push(tokio::spawn(async move {
            router
                .submit(SubmitRequest::limit(buyer, &symbol, Side::Buy, 1, 500))
                .await
        }));
    }

    for handle in handles {
        let reply = handle.await.unwrap();
        assert_eq!(reply.status, OrderStatus::Filled);
        assert_eq!(reply.fills.len(), 1);
        assert_eq!(reply.fills[0].maker_order_id, sell_order_id);
    }

    assert_eq!(trade_count(&pool, &symbol).await, 100);
    assert_eq!(order_status(&pool, sell_order_id).await, "FILLED");
    assert_eq!(position_state(&pool, seller, &symbol).await.0, 0);
    assert_eq!(account_state(&pool, seller).await, (50_000, 0));

    // Committed sequence numbers are strictly increasing in commit order
    let rows = sqlx::query(
        "SELECT sequence_number FROM orders WHERE symbol = $1 AND side = 'BUY'
         ORDER BY sequence_number ASC",
    )
    .bind(&symbol)
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(rows.len(), 100);
    let sequences: Vec<i64> = rows.iter().map(|r| r.get("sequence_number")).collect();
    for pair in sequences.windows(2) {
        assert!(pair[0] < pair[1]);
    }

    router.shutdown().await;
}

#[tokio::test]
async fn test_recovery_rebuilds_identical_book() {
    let url = require_database!();
    let pool = connect(&url).await;
    let symbol = fresh_symbol();
    let router = start_exchange(&pool, &symbol).await;

    let buyer = create_trader(&pool, 100_000).await;
    let seller = create_trader(&pool, 0).await;
    seed_shares(&pool, seller, &symbol, 20, 0).await;

    router
        .submit(SubmitRequest::limit(buyer, &symbol, Side::Buy, 10, 490))
        .await;
    router
        .submit(SubmitRequest::limit(buyer, &symbol, Side::Buy, 5, 480))
        .await;
    router
        .submit(SubmitRequest::limit(seller, &symbol, Side::Sell, 8, 510))
        .await;
    // One partial fill so a PARTIALLY_FILLED order is part of recovery
    router
        .submit(SubmitRequest::limit(seller, &symbol, Side::Sell, 12, 490))
        .await;

    let before = router.snapshot(&symbol).await.unwrap();
    router.shutdown().await;

    // Restart: a fresh router recovers from the store alone
    let restarted = start_exchange(&pool, &symbol).await;
    let after = restarted.snapshot(&symbol).await.unwrap();

    assert_eq!(before.bids, after.bids);
    assert_eq!(before.asks, after.asks);
    assert_eq!(before.best_bid, after.best_bid);
    assert_eq!(before.best_ask, after.best_ask);
    assert_eq!(before.last_price_in_cents, after.last_price_in_cents);

    restarted.shutdown().await;
}
