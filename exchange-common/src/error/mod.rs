//! Consolidated error handling for the exchange.
//!
//! This module provides:
//! - Common error types reused across crates
//! - Error classification for retry logic
//!
//! Client-visible rejections (insufficient cash, unknown symbol, ...) are
//! *values* ([`crate::orders::RejectReason`]), not errors; the types here
//! cover infrastructure failures only.

mod common;
mod traits;

pub use common::*;
pub use traits::*;
