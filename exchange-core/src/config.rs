//! Application settings.
//!
//! Layered the usual way: `config/default`, then `config/{RUN_MODE}`, then
//! `config/local`, then `EXCHANGE__`-prefixed environment variables. The
//! operational knobs also accept flat environment variables
//! (`DATABASE_URL`, `PER_SYMBOL_QUEUE_CAPACITY`, `EXPIRATION_TICK_SECONDS`,
//! `MARKET_ORDER_SLIPPAGE_CUSHION`, `DB_MAX_RETRIES`, `DB_RETRY_BASE_MS`,
//! `DB_RETRY_MAX_MS`) which override everything else.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Database configuration
    pub database: DatabaseSettings,
    /// Matching engine configuration
    #[serde(default)]
    pub engine: EngineSettings,
    /// Tradable symbols (the closed registry)
    #[serde(default)]
    pub symbols: Vec<String>,
}

/// Database connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

/// Matching engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Capacity of each per-symbol intent queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Worst-case multiplier for market-buy cash reservations
    #[serde(default = "default_slippage_cushion")]
    pub slippage_cushion: f64,
    /// Attempts for a submit/cancel transaction before reporting INTERNAL
    #[serde(default = "default_db_max_retries")]
    pub db_max_retries: u32,
    /// Initial retry backoff in milliseconds
    #[serde(default = "default_db_retry_base_ms")]
    pub db_retry_base_ms: u64,
    /// Backoff ceiling in milliseconds
    #[serde(default = "default_db_retry_max_ms")]
    pub db_retry_max_ms: u64,
    /// Expiration scheduler tick in seconds
    #[serde(default = "default_expiration_tick_seconds")]
    pub expiration_tick_seconds: u64,
    /// Orders expired per tick
    #[serde(default = "default_expiration_batch_size")]
    pub expiration_batch_size: i64,
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_slippage_cushion() -> f64 {
    1.10
}

fn default_db_max_retries() -> u32 {
    5
}

fn default_db_retry_base_ms() -> u64 {
    50
}

fn default_db_retry_max_ms() -> u64 {
    1500
}

fn default_expiration_tick_seconds() -> u64 {
    1
}

fn default_expiration_batch_size() -> i64 {
    100
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            slippage_cushion: default_slippage_cushion(),
            db_max_retries: default_db_max_retries(),
            db_retry_base_ms: default_db_retry_base_ms(),
            db_retry_max_ms: default_db_retry_max_ms(),
            expiration_tick_seconds: default_expiration_tick_seconds(),
            expiration_batch_size: default_expiration_batch_size(),
        }
    }
}

fn env_override<T: FromStr>(name: &str, target: &mut T) {
    if let Ok(raw) = env::var(name) {
        if let Ok(value) = raw.parse::<T>() {
            *target = value;
        }
    }
}

impl Settings {
    /// Load settings from configuration files and environment
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());
        let config_dir =
            env::var("EXCHANGE_CONFIG_DIR").unwrap_or_else(|_| "config".into());

        let loaded = Config::builder()
            .add_source(File::with_name(&format!("{config_dir}/default")).required(false))
            .add_source(File::with_name(&format!("{config_dir}/{run_mode}")).required(false))
            .add_source(File::with_name(&format!("{config_dir}/local")).required(false))
            .add_source(
                Environment::with_prefix("EXCHANGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_default("database.url", default_database_url())?
            .build()?;

        let mut settings: Settings = loaded.try_deserialize()?;
        settings.apply_flat_env_overrides();
        Ok(settings)
    }

    /// Create default settings (useful for testing and local runs)
    pub fn default_settings() -> Self {
        let mut settings = Settings {
            database: DatabaseSettings {
                url: default_database_url(),
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
            },
            engine: EngineSettings::default(),
            symbols: Vec::new(),
        };
        settings.apply_flat_env_overrides();
        settings
    }

    /// Apply the flat, documented environment knobs on top of whatever the
    /// layered sources produced.
    fn apply_flat_env_overrides(&mut self) {
        env_override("DATABASE_URL", &mut self.database.url);
        env_override(
            "PER_SYMBOL_QUEUE_CAPACITY",
            &mut self.engine.queue_capacity,
        );
        env_override(
            "EXPIRATION_TICK_SECONDS",
            &mut self.engine.expiration_tick_seconds,
        );
        env_override(
            "MARKET_ORDER_SLIPPAGE_CUSHION",
            &mut self.engine.slippage_cushion,
        );
        env_override("DB_MAX_RETRIES", &mut self.engine.db_max_retries);
        env_override("DB_RETRY_BASE_MS", &mut self.engine.db_retry_base_ms);
        env_override("DB_RETRY_MAX_MS", &mut self.engine.db_retry_max_ms);
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::default_settings()
    }
}

fn default_database_url() -> String {
    env::var("DATABASE_URL").unwrap_or_else(|_| "postgresql://localhost/exchange".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_defaults_match_documented_knobs() {
        let engine = EngineSettings::default();
        assert_eq!(engine.queue_capacity, 1024);
        assert_eq!(engine.slippage_cushion, 1.10);
        assert_eq!(engine.db_max_retries, 5);
        assert_eq!(engine.db_retry_base_ms, 50);
        assert_eq!(engine.db_retry_max_ms, 1500);
        assert_eq!(engine.expiration_tick_seconds, 1);
    }

    #[test]
    fn test_default_settings_pool_sizes() {
        let settings = Settings::default_settings();
        assert_eq!(settings.database.max_connections, 10);
        assert_eq!(settings.database.min_connections, 2);
        assert!(settings.symbols.is_empty());
    }
}
