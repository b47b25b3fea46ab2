//! Persistent stores for the exchange.
//!
//! Every mutating operation takes an open [`sqlx::Transaction`]; nothing in
//! this module commits. The matching engine owns transaction boundaries so
//! that orders, trades, ledger entries, positions, and outbox events always
//! change as one atomic unit.

pub mod accounts;
pub mod ledger;
pub mod orders;
pub mod outbox;
pub mod positions;
pub mod schema;
pub mod sequence;
pub mod trades;

use exchange_common::error::{DatabaseError, ErrorCategory, ErrorClassification};
use exchange_common::orders::{OrderId, OrderStatus, TraderId};
use thiserror::Error;

/// Shorthand for the transaction handle all store operations take.
pub type Tx<'a> = sqlx::Transaction<'a, sqlx::Postgres>;

/// Errors from the persistent stores.
///
/// Resource failures (`InsufficientCash`, `InsufficientShares`,
/// `TraderInactive`) are surfaced to the submitter as rejections and roll
/// the transaction back without retrying.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("trader not found: {0}")]
    TraderNotFound(TraderId),

    #[error("trader is inactive: {0}")]
    TraderInactive(TraderId),

    #[error("insufficient cash: need {needed_in_cents}, available {available_in_cents}")]
    InsufficientCash {
        needed_in_cents: i64,
        available_in_cents: i64,
    },

    #[error("insufficient shares of {symbol}: need {needed}, available {available}")]
    InsufficientShares {
        symbol: String,
        needed: i64,
        available: i64,
    },

    #[error("order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("invalid status transition for order {order_id}: {from} -> {to}")]
    InvalidTransition {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },

    /// Persistent state contradicts an engine invariant. Fatal for the
    /// symbol that observed it.
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Database(DatabaseError::from(err))
    }
}

impl ErrorClassification for StorageError {
    fn category(&self) -> ErrorCategory {
        match self {
            StorageError::Database(inner) => inner.category(),
            _ => ErrorCategory::Permanent,
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
