//! Db command - schema utilities.

use anyhow::Result;
use clap::{Args, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::config::Settings;
use crate::storage::schema;

#[derive(Args)]
pub struct DbArgs {
    #[command(subcommand)]
    pub command: DbCommand,
}

#[derive(Subcommand)]
pub enum DbCommand {
    /// Create the exchange tables if they do not exist
    EnsureSchema,
}

pub async fn execute(args: DbArgs) -> Result<()> {
    let settings = Settings::load().unwrap_or_else(|_| Settings::default_settings());

    match args.command {
        DbCommand::EnsureSchema => {
            let pool = PgPoolOptions::new()
                .max_connections(settings.database.max_connections)
                .connect(&settings.database.url)
                .await?;
            schema::ensure_schema(&pool).await?;
            info!("schema ready");
        }
    }

    Ok(())
}
