//! Error classification for retry logic.
//!
//! Errors self-describe whether a retry can help, which lets the matching
//! engine re-run a whole submit transaction on serialization conflicts
//! without special-casing every failure site.

use std::time::Duration;

use super::common::*;

/// Classification of error types for handling decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// May resolve on retry (conflicts, timeouts, lost connections)
    Transient,
    /// Won't resolve on retry (bad SQL, missing rows)
    Permanent,
    /// Resource exhaustion (pool exhausted, queue full)
    ResourceExhausted,
    /// Configuration errors
    Configuration,
}

/// Trait for errors that can classify themselves for retry logic.
pub trait ErrorClassification {
    /// Returns the category of this error
    fn category(&self) -> ErrorCategory;

    /// Returns true if this error is transient and may succeed on retry
    fn is_transient(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transient | ErrorCategory::ResourceExhausted
        )
    }

    /// Returns true if this error is permanent and won't succeed on retry
    fn is_permanent(&self) -> bool {
        matches!(self.category(), ErrorCategory::Permanent)
    }
}

impl ErrorClassification for DatabaseError {
    fn category(&self) -> ErrorCategory {
        match self {
            DatabaseError::Connection(_) => ErrorCategory::Transient,
            DatabaseError::Conflict(_) => ErrorCategory::Transient,
            DatabaseError::Timeout(_) => ErrorCategory::Transient,
            DatabaseError::PoolExhausted => ErrorCategory::ResourceExhausted,
            DatabaseError::Query(_) => ErrorCategory::Permanent,
            DatabaseError::RowNotFound(_) => ErrorCategory::Permanent,
        }
    }
}

impl ErrorClassification for ConfigurationError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Configuration
    }
}

impl ErrorClassification for ChannelError {
    fn category(&self) -> ErrorCategory {
        match self {
            ChannelError::Full { .. } => ErrorCategory::ResourceExhausted,
            ChannelError::Closed | ChannelError::ReplyDropped => ErrorCategory::Permanent,
        }
    }
}

/// Retry an async operation with exponential backoff.
///
/// The delay doubles after each attempt, capped at `max_delay`. Permanent
/// errors and exhausted attempts return the last error unchanged.
pub async fn retry_with_backoff<T, E, F, Fut>(
    mut operation: F,
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
) -> Result<T, E>
where
    E: ErrorClassification,
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut attempts = 0;
    let mut delay = initial_delay;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempts += 1;

                if !err.is_transient() || attempts >= max_attempts {
                    return Err(err);
                }

                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, max_delay);
            }
        }
    }
}
