//! Command-line interface for the `exchanged` binary.

pub mod db;
pub mod serve;

use clap::{Parser, Subcommand};

/// Virtual securities exchange daemon
#[derive(Parser)]
#[command(name = "exchanged", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the exchange service
    Serve(serve::ServeArgs),
    /// Database operations
    Db(db::DbArgs),
}
