//! Startup recovery: rebuild every symbol's in-memory book from the order
//! store, then start the engine loops.
//!
//! Invariant afterwards: each book holds exactly the open orders the store
//! holds for that symbol, with `remaining = quantity - filled_quantity`.
//! Reservations already reflect those orders, so nothing is re-reserved.

use sqlx::PgPool;
use tokio::sync::mpsc;
use tracing::info;

use exchange_common::symbols::SymbolRegistry;

use crate::book::{Book, RestingOrder};
use crate::config::EngineSettings;
use crate::storage::{orders, trades, StorageError, StorageResult};

use super::router::{EngineHandle, Router};
use super::{EngineCommand, SymbolProcessor};

/// Rebuild one symbol's book from its open orders, in sequence order.
pub async fn rebuild_book(pool: &PgPool, symbol: &str) -> StorageResult<Book> {
    let mut book = Book::new(symbol);
    book.set_last_trade_price(trades::last_price(pool, symbol).await?);

    for order in orders::load_open_orders(pool, symbol).await? {
        let price = order.limit_price_in_cents.ok_or_else(|| {
            StorageError::Invariant(format!("open order {} has no price", order.order_id))
        })?;
        let remaining = order.remaining();
        if remaining <= 0 {
            return Err(StorageError::Invariant(format!(
                "open order {} has nothing remaining",
                order.order_id
            )));
        }

        book.add(
            order.side,
            price,
            RestingOrder {
                order_id: order.order_id,
                trader_id: order.trader_id,
                remaining,
                sequence_number: order.sequence_number,
            },
        );
    }

    Ok(book)
}

/// Rebuild all books and start one engine task per symbol, returning the
/// router that fronts them.
pub async fn recover_books(
    pool: &PgPool,
    registry: &SymbolRegistry,
    settings: &EngineSettings,
) -> StorageResult<Router> {
    let router = Router::new(pool.clone(), registry.clone());

    for symbol in registry.iter() {
        let book = rebuild_book(pool, symbol).await?;
        info!(
            symbol,
            resting_orders = book.resting_order_count(),
            "order book rebuilt"
        );

        let (tx, rx) = mpsc::channel::<EngineCommand>(settings.queue_capacity);
        let processor =
            SymbolProcessor::new(symbol, pool.clone(), settings.clone(), book, rx);
        let task = tokio::spawn(processor.run());
        router.register(symbol, EngineHandle::new(tx), task);
    }

    info!(symbols = registry.len(), "recovery complete");
    Ok(router)
}
