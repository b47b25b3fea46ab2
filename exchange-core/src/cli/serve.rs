//! Serve command - start the exchange service.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::broadcast;
use tracing::info;

use exchange_common::symbols::SymbolRegistry;

use crate::config::Settings;
use crate::engine::{recover_books, ExpirationScheduler};
use crate::storage::schema;

/// Arguments for the serve command
#[derive(Args)]
pub struct ServeArgs {
    /// Symbols to trade (comma-separated); overrides configuration
    #[arg(long, short, value_delimiter = ',')]
    pub symbols: Option<Vec<String>>,
}

/// Execute the serve command
pub async fn execute(args: ServeArgs) -> Result<()> {
    let settings = Settings::load().unwrap_or_else(|_| Settings::default_settings());

    let symbols = args.symbols.unwrap_or_else(|| settings.symbols.clone());
    if symbols.is_empty() {
        bail!("no symbols configured; set `symbols` in config or pass --symbols");
    }
    let registry =
        SymbolRegistry::new(symbols).context("invalid symbol in configuration")?;

    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(settings.database.max_connections)
        .min_connections(settings.database.min_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&settings.database.url)
        .await
        .context("database connection failed")?;

    schema::ensure_schema(&pool).await?;

    let router = Arc::new(
        recover_books(&pool, &registry, &settings.engine)
            .await
            .context("recovery failed")?,
    );

    let (shutdown_tx, _) = broadcast::channel(1);
    let scheduler = ExpirationScheduler::new(pool.clone(), Arc::clone(&router), settings.engine.clone());
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_tx.subscribe()));

    info!(symbols = registry.len(), "exchange running; ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    info!("shutting down");
    let _ = shutdown_tx.send(());
    router.shutdown().await;
    let _ = scheduler_task.await;

    Ok(())
}
