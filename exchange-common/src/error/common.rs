//! Common error types shared across crates.

use std::time::Duration;
use thiserror::Error;

/// Database-related errors.
///
/// Use this for all database operations including queries, connections,
/// and transactions.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DatabaseError {
    /// Query execution failed
    #[error("Query failed: {0}")]
    Query(String),

    /// Connection to database failed
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Transaction could not complete (serialization conflict, deadlock)
    #[error("Transaction conflict: {0}")]
    Conflict(String),

    /// Connection pool exhausted
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Query timeout
    #[error("Query timeout after {0:?}")]
    Timeout(Duration),

    /// Row expected by an invariant was missing
    #[error("Row not found: {0}")]
    RowNotFound(String),
}

// Postgres class 40 errors (serialization_failure, deadlock_detected) are
// retried; everything else is either connectivity or a genuine bad query.
impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut => DatabaseError::PoolExhausted,
            sqlx::Error::Io(_) => DatabaseError::Connection(err.to_string()),
            sqlx::Error::RowNotFound => DatabaseError::RowNotFound(err.to_string()),
            sqlx::Error::Database(db) => {
                let code = db.code();
                let code = code.as_deref().unwrap_or("");
                if code == "40001" || code == "40P01" {
                    DatabaseError::Conflict(err.to_string())
                } else {
                    DatabaseError::Query(err.to_string())
                }
            }
            _ => DatabaseError::Query(err.to_string()),
        }
    }
}

/// Configuration-related errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// Required field is missing
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Field has invalid value
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    /// Configuration could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Environment variable not set
    #[error("Environment variable not set: {0}")]
    EnvVarMissing(String),
}

/// Channel/queue communication errors.
///
/// Use this for mpsc and oneshot channel operations between the router and
/// the per-symbol engines.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ChannelError {
    /// Channel is closed (engine stopped)
    #[error("Channel closed")]
    Closed,

    /// Channel is full (backpressure)
    #[error("Channel full (capacity: {capacity})")]
    Full { capacity: usize },

    /// The reply sender was dropped before answering
    #[error("Reply dropped")]
    ReplyDropped,
}
