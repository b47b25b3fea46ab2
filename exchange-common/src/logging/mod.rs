//! Standardized logging configuration for the exchange.
//!
//! Provides a consistent format across binaries with support for
//! human-readable console output (default) and JSON for log aggregation.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Standard tracing filter (e.g., `info`, `exchange_core=debug`)
//! - `LOG_FORMAT`: Output format - `pretty` (default), `compact`, or `json`

mod config;

pub use config::{init_logging, LogConfig, LogFormat};
