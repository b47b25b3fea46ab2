//! The matching engine: one single-writer task per symbol, a router that
//! dispatches intents to them, the settlement pipeline, the expiration
//! scheduler, and startup recovery.

mod expiration;
mod processor;
mod recovery;
mod router;
mod settlement;
mod validate;

pub use expiration::ExpirationScheduler;
pub use processor::{EngineCommand, SymbolProcessor};
pub use recovery::recover_books;
pub use router::Router;

use exchange_common::error::{ErrorCategory, ErrorClassification};
use thiserror::Error;

use crate::storage::StorageError;

/// Engine-side failures. Client rejections are replies, not errors; these
/// cover infrastructure and invariant failures only.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Persistent and in-memory state disagree. The engine for the symbol
    /// that observed this stops consuming; other symbols keep running.
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl EngineError {
    /// True when the symbol's engine must stop instead of replying
    /// `INTERNAL` and carrying on.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::Invariant(_) | EngineError::Storage(StorageError::Invariant(_))
        )
    }
}

impl ErrorClassification for EngineError {
    fn category(&self) -> ErrorCategory {
        match self {
            EngineError::Storage(inner) => inner.category(),
            EngineError::Invariant(_) => ErrorCategory::Permanent,
        }
    }
}
