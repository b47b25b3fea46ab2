//! Time-in-force expiration.
//!
//! A single periodic task queries for orders whose `expires_at` has passed
//! and emits synthetic cancel intents through the router. The owning
//! engine's cancel path does the actual work, so the book and the store
//! change together. An order may expire up to one tick late; never early.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use exchange_common::error::retry_with_backoff;

use crate::config::EngineSettings;
use crate::storage::orders;

use super::Router;

/// Periodically retires orders whose time-in-force has elapsed.
pub struct ExpirationScheduler {
    pool: PgPool,
    router: Arc<Router>,
    tick: Duration,
    batch_size: i64,
    settings: EngineSettings,
}

impl ExpirationScheduler {
    pub fn new(pool: PgPool, router: Arc<Router>, settings: EngineSettings) -> Self {
        Self {
            pool,
            router,
            tick: Duration::from_secs(settings.expiration_tick_seconds),
            batch_size: settings.expiration_batch_size,
            settings,
        }
    }

    /// Run until a shutdown signal arrives.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(tick = ?self.tick, "expiration scheduler started");

        loop {
            tokio::select! {
                _ = interval.tick() => self.expire_due_orders().await,
                _ = shutdown.recv() => break,
            }
        }

        info!("expiration scheduler stopped");
    }

    /// One tick: find due orders and hand them to their engines.
    async fn expire_due_orders(&self) {
        let now = Utc::now();

        let expired = retry_with_backoff(
            || orders::load_expired(&self.pool, now, self.batch_size),
            self.settings.db_max_retries,
            Duration::from_millis(self.settings.db_retry_base_ms),
            Duration::from_millis(self.settings.db_retry_max_ms),
        )
        .await;

        let expired = match expired {
            Ok(expired) => expired,
            Err(err) => {
                warn!(error = %err, "expiration query failed");
                return;
            }
        };

        if expired.is_empty() {
            return;
        }

        debug!(count = expired.len(), "expiring orders");
        for order in expired {
            self.router
                .cancel_for_expiration(&order.symbol, order.trader_id, order.order_id);
        }
    }
}
