//! Exchange daemon CLI
//!
//! Provides commands for:
//! - `serve`: Start the exchange service
//! - `db`: Database operations
//!
//! # Logging Configuration
//!
//! Configure via environment variables:
//! - `RUST_LOG`: Log filter (e.g., "exchange_core=debug,sqlx=warn")
//! - `LOG_FORMAT`: Output format ("pretty", "compact", "json")

use anyhow::Result;
use clap::Parser;

use exchange_common::logging::{init_logging, LogConfig};
use exchange_core::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let log_config =
        LogConfig::from_env().with_default_level("exchange_core=info,sqlx=warn");
    init_logging(log_config)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    dotenv::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => {
            exchange_core::cli::serve::execute(args).await?;
        }
        Commands::Db(args) => {
            exchange_core::cli::db::execute(args).await?;
        }
    }

    Ok(())
}
