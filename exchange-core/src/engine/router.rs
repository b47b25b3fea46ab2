//! Process-wide registry mapping symbols to their matching engines.
//!
//! Dispatch holds no global lock: the symbol map is a `DashMap` populated
//! once at startup, and each dispatch is a bounded `try_send` onto that
//! symbol's queue. A full queue answers `BUSY` immediately instead of
//! applying backpressure to unrelated symbols.

use dashmap::DashMap;
use parking_lot::Mutex;
use sqlx::PgPool;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::warn;

use exchange_common::orders::{
    BookSnapshot, CancelOutcome, CancelReason, CancelRequest, OrderId, RejectReason, SubmitReply,
    SubmitRequest, TraderId,
};
use exchange_common::symbols::SymbolRegistry;

use crate::storage::orders;

use super::EngineCommand;

/// Sending side of one engine's intent queue.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    pub fn new(tx: mpsc::Sender<EngineCommand>) -> Self {
        Self { tx }
    }
}

/// Routes intents to per-symbol engines.
pub struct Router {
    pool: PgPool,
    registry: SymbolRegistry,
    engines: DashMap<String, EngineHandle>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Router {
    pub fn new(pool: PgPool, registry: SymbolRegistry) -> Self {
        Self {
            pool,
            registry,
            engines: DashMap::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Register a symbol's engine. Called once per symbol during recovery.
    pub fn register(&self, symbol: impl Into<String>, handle: EngineHandle, task: JoinHandle<()>) {
        self.engines.insert(symbol.into(), handle);
        self.tasks.lock().push(task);
    }

    pub fn symbols(&self) -> Vec<String> {
        self.engines.iter().map(|e| e.key().clone()).collect()
    }

    /// Enqueue a submit intent and wait for the engine's reply.
    pub async fn submit(&self, request: SubmitRequest) -> SubmitReply {
        if !self.registry.contains(&request.symbol) {
            return SubmitReply::rejected(RejectReason::UnknownSymbol);
        }
        let Some(handle) = self.engines.get(&request.symbol).map(|e| e.value().clone()) else {
            return SubmitReply::rejected(RejectReason::UnknownSymbol);
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        match handle.tx.try_send(EngineCommand::Submit {
            request,
            reply: reply_tx,
        }) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                return SubmitReply::rejected(RejectReason::Busy);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                return SubmitReply::rejected(RejectReason::Internal);
            }
        }

        // The engine always answers: a deadline that elapsed in the queue
        // comes back as TIMEOUT. A dropped reply means the engine died.
        reply_rx
            .await
            .unwrap_or_else(|_| SubmitReply::rejected(RejectReason::Internal))
    }

    /// Look up the order's symbol and enqueue a user cancel intent.
    pub async fn cancel(&self, trader_id: TraderId, order_id: OrderId) -> CancelOutcome {
        let order = match orders::get_by_id(&self.pool, order_id).await {
            Ok(Some(order)) => order,
            Ok(None) => return CancelOutcome::Unknown,
            Err(err) => {
                warn!(%order_id, error = %err, "cancel lookup failed");
                return CancelOutcome::Unknown;
            }
        };

        let Some(handle) = self.engines.get(&order.symbol).map(|e| e.value().clone()) else {
            return CancelOutcome::Unknown;
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let command = EngineCommand::Cancel {
            request: CancelRequest {
                trader_id,
                order_id,
                reason: CancelReason::User,
            },
            reply: Some(reply_tx),
        };

        if handle.tx.try_send(command).is_err() {
            return CancelOutcome::Unknown;
        }

        reply_rx.await.unwrap_or(CancelOutcome::Unknown)
    }

    /// Fire-and-forget cancel used by the expiration scheduler. The caller
    /// already knows the order's symbol and owner.
    pub fn cancel_for_expiration(&self, symbol: &str, trader_id: TraderId, order_id: OrderId) {
        let Some(handle) = self.engines.get(symbol).map(|e| e.value().clone()) else {
            warn!(%order_id, symbol, "expiration cancel for unrouted symbol");
            return;
        };

        let command = EngineCommand::Cancel {
            request: CancelRequest {
                trader_id,
                order_id,
                reason: CancelReason::Expired,
            },
            reply: None,
        };

        // A full queue just means the next tick retries this order.
        if let Err(mpsc::error::TrySendError::Full(_)) = handle.tx.try_send(command) {
            warn!(%order_id, symbol, "engine queue full, expiration deferred");
        }
    }

    /// Read a consistent snapshot through the engine's queue, so it never
    /// interleaves with a half-applied submit.
    pub async fn snapshot(&self, symbol: &str) -> Result<BookSnapshot, RejectReason> {
        if !self.registry.contains(symbol) {
            return Err(RejectReason::UnknownSymbol);
        }
        let Some(handle) = self.engines.get(symbol).map(|e| e.value().clone()) else {
            return Err(RejectReason::UnknownSymbol);
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        match handle.tx.try_send(EngineCommand::Snapshot { reply: reply_tx }) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => return Err(RejectReason::Busy),
            Err(mpsc::error::TrySendError::Closed(_)) => return Err(RejectReason::Internal),
        }

        reply_rx.await.map_err(|_| RejectReason::Internal)
    }

    /// Ask every engine to stop and wait for the tasks to finish.
    pub async fn shutdown(&self) {
        for entry in self.engines.iter() {
            let _ = entry.value().tx.send(EngineCommand::Shutdown).await;
        }

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
    }
}
