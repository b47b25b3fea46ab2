//! Per-symbol single-writer matching engine.
//!
//! One `SymbolProcessor` task owns one symbol's book and consumes intents
//! from a bounded channel, exactly one at a time. The database transaction
//! it opens per intent is the only suspension point; while it is in flight
//! no other intent for the symbol makes progress, and other symbols run in
//! parallel.
//!
//! The book is never mutated before the transaction commits: matching runs
//! as a pure simulation, the post-commit book is prepared as a clone, and
//! the clone replaces the live book only on commit success. A failed commit
//! leaves both the store and the book untouched.

use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use exchange_common::error::ErrorClassification;
use exchange_common::orders::{
    BookSnapshot, CancelOutcome, CancelReason, CancelRequest, FillInfo, OrderStatus, OrderType,
    RejectReason, Side, SubmitReply, SubmitRequest, TradeId,
};

use crate::book::{Book, RestingOrder, TakerIntent};
use crate::config::EngineSettings;
use crate::storage::outbox::{BookChangedPayload, OrderAcceptedPayload, OutboxEvent};
use crate::storage::trades::TradeRecord;
use crate::storage::{accounts, orders, outbox, positions, StorageError, Tx};

use super::settlement;
use super::validate;
use super::EngineError;

/// Intents delivered to a symbol's engine.
pub enum EngineCommand {
    Submit {
        request: SubmitRequest,
        reply: oneshot::Sender<SubmitReply>,
    },
    Cancel {
        request: CancelRequest,
        /// Absent for fire-and-forget cancels from the expiration scheduler
        reply: Option<oneshot::Sender<CancelOutcome>>,
    },
    Snapshot {
        reply: oneshot::Sender<BookSnapshot>,
    },
    Shutdown,
}

/// Single-writer matching engine for one symbol.
pub struct SymbolProcessor {
    symbol: String,
    pool: PgPool,
    settings: EngineSettings,
    book: Book,
    rx: mpsc::Receiver<EngineCommand>,
}

impl SymbolProcessor {
    pub fn new(
        symbol: impl Into<String>,
        pool: PgPool,
        settings: EngineSettings,
        book: Book,
        rx: mpsc::Receiver<EngineCommand>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            pool,
            settings,
            book,
            rx,
        }
    }

    /// Consume intents until shutdown, channel closure, or a fatal
    /// invariant violation.
    pub async fn run(mut self) {
        info!(symbol = %self.symbol, "matching engine started");

        while let Some(command) = self.rx.recv().await {
            match command {
                EngineCommand::Submit { request, reply } => {
                    if deadline_elapsed(&request) {
                        let _ = reply.send(SubmitReply::rejected(RejectReason::Timeout));
                        continue;
                    }

                    match self.handle_submit(&request).await {
                        Ok(outcome) => {
                            let _ = reply.send(outcome);
                        }
                        Err(err) if err.is_fatal() => {
                            error!(
                                symbol = %self.symbol,
                                error = %err,
                                trader_id = %request.trader_id,
                                "invariant violation; engine stopping"
                            );
                            let _ = reply.send(SubmitReply::rejected(RejectReason::Internal));
                            break;
                        }
                        Err(err) => {
                            warn!(symbol = %self.symbol, error = %err, "submit failed");
                            let _ = reply.send(SubmitReply::rejected(RejectReason::Internal));
                        }
                    }
                }
                EngineCommand::Cancel { request, reply } => {
                    match self.handle_cancel(&request).await {
                        Ok(outcome) => {
                            if let Some(reply) = reply {
                                let _ = reply.send(outcome);
                            }
                        }
                        Err(err) if err.is_fatal() => {
                            error!(
                                symbol = %self.symbol,
                                error = %err,
                                order_id = %request.order_id,
                                "invariant violation; engine stopping"
                            );
                            if let Some(reply) = reply {
                                let _ = reply.send(CancelOutcome::Unknown);
                            }
                            break;
                        }
                        Err(err) => {
                            warn!(symbol = %self.symbol, error = %err, "cancel failed");
                            if let Some(reply) = reply {
                                let _ = reply.send(CancelOutcome::Unknown);
                            }
                        }
                    }
                }
                EngineCommand::Snapshot { reply } => {
                    let _ = reply.send(self.book.snapshot());
                }
                EngineCommand::Shutdown => break,
            }
        }

        info!(symbol = %self.symbol, "matching engine stopped");
    }

    /// Validate, then run the submit transaction with retries on transient
    /// database failures. Re-running is safe because the book is untouched
    /// until commit.
    async fn handle_submit(&mut self, request: &SubmitRequest) -> Result<SubmitReply, EngineError> {
        if let Err(reason) = validate::validate_submit(request) {
            return Ok(SubmitReply::rejected(reason));
        }

        // A market-style buy needs a reference ask before anything persists.
        if request.side == Side::Buy
            && market_like(request)
            && self.book.best_ask().is_none()
        {
            return Ok(SubmitReply::rejected(RejectReason::NoLiquidity));
        }

        let mut attempt = 0;
        let mut delay = Duration::from_millis(self.settings.db_retry_base_ms);

        loop {
            match self.try_submit(request).await {
                Ok(reply) => return Ok(reply),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) if err.is_transient() && attempt + 1 < self.settings.db_max_retries => {
                    attempt += 1;
                    debug!(
                        symbol = %self.symbol,
                        attempt,
                        error = %err,
                        "transient submit failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(
                        delay * 2,
                        Duration::from_millis(self.settings.db_retry_max_ms),
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn try_submit(&mut self, request: &SubmitRequest) -> Result<SubmitReply, EngineError> {
        let mut tx = self.pool.begin().await.map_err(StorageError::from)?;

        match self.run_submit(&mut tx, request).await {
            Ok((reply, book_after)) => {
                tx.commit().await.map_err(StorageError::from)?;
                self.book = book_after;
                Ok(reply)
            }
            Err(err) => {
                let _ = tx.rollback().await;
                match rejection_for(&err) {
                    Some(reason) => Ok(SubmitReply::rejected(reason)),
                    None => Err(EngineError::Storage(err)),
                }
            }
        }
    }

    /// The submit transaction: reserve, insert, simulate, settle, resolve
    /// the taker, append events. Returns the reply and the post-commit
    /// book.
    async fn run_submit(
        &self,
        tx: &mut Tx<'_>,
        request: &SubmitRequest,
    ) -> Result<(SubmitReply, Book), StorageError> {
        let quantity = i64::from(request.quantity);
        let limit_price = request.limit_price_in_cents.map(i64::from);
        let market_like = market_like(request);

        // Reserve resources. `cash_cap` bounds how much a market-style buy
        // may spend so settlement can never exceed the reservation.
        let mut reserved_cash = 0i64;
        let mut cash_cap = None;

        match request.side {
            Side::Buy => {
                if let Some(price) = limit_price {
                    reserved_cash = quantity * price;
                    accounts::reserve_cash(tx, request.trader_id, reserved_cash).await?;
                } else {
                    // Reserve against the ask level a fill of this size
                    // would have to reach, cushioned for slippage.
                    let reference_ask =
                        self.book.marginal_ask_price(quantity).ok_or_else(|| {
                            StorageError::Invariant("market buy against empty ask side".into())
                        })?;
                    let estimate = validate::market_reserve_estimate(
                        quantity,
                        reference_ask,
                        self.settings.slippage_cushion,
                    );

                    let account = accounts::get_active_for_update(tx, request.trader_id).await?;
                    let reserve = if account.admin {
                        estimate
                    } else {
                        estimate.min(account.available_in_cents())
                    };
                    if reserve <= 0 {
                        return Err(StorageError::InsufficientCash {
                            needed_in_cents: estimate,
                            available_in_cents: account.available_in_cents(),
                        });
                    }

                    accounts::reserve_cash(tx, request.trader_id, reserve).await?;
                    reserved_cash = reserve;
                    cash_cap = Some(reserve);
                }
            }
            Side::Sell => {
                accounts::get_active_for_update(tx, request.trader_id).await?;
                positions::reserve_shares(tx, request.trader_id, &request.symbol, quantity)
                    .await?;
            }
        }

        let order = orders::insert(
            tx,
            &orders::OrderDraft {
                trader_id: request.trader_id,
                symbol: request.symbol.clone(),
                side: request.side,
                order_type: request.order_type,
                limit_price_in_cents: limit_price,
                quantity,
                tif_seconds: request.tif_seconds.map(i64::from),
            },
        )
        .await?;

        outbox::append(
            tx,
            &self.symbol,
            &OutboxEvent::OrderAccepted(OrderAcceptedPayload {
                order_id: order.order_id,
                symbol: order.symbol.clone(),
                side: order.side.as_str().to_string(),
                order_type: order.order_type.as_str().to_string(),
                quantity: order.quantity,
                limit_price_in_cents: order.limit_price_in_cents,
                created_at: order.created_at,
            }),
        )
        .await?;

        // Simulate against the live book; nothing is mutated yet.
        let plan = self.book.plan(&TakerIntent {
            order_id: order.order_id,
            trader_id: request.trader_id,
            side: request.side,
            quantity,
            limit_price_in_cents: limit_price,
            cash_cap_in_cents: cash_cap,
        });

        for fill in &plan.fills {
            let (buy_order_id, sell_order_id, buyer_id, seller_id) = match request.side {
                Side::Buy => (
                    order.order_id,
                    fill.maker_order_id,
                    request.trader_id,
                    fill.maker_trader_id,
                ),
                Side::Sell => (
                    fill.maker_order_id,
                    order.order_id,
                    fill.maker_trader_id,
                    request.trader_id,
                ),
            };

            let trade = TradeRecord {
                trade_id: TradeId::generate(),
                symbol: self.symbol.clone(),
                price_in_cents: fill.price_in_cents,
                quantity: fill.quantity,
                buy_order_id,
                sell_order_id,
                buyer_id,
                seller_id,
                maker_order_id: fill.maker_order_id,
                taker_order_id: order.order_id,
                executed_at: Utc::now(),
            };

            settlement::settle_fill(tx, &trade, request.side, limit_price).await?;
        }

        // Resolve the taker.
        let filled = plan.filled_quantity();
        let mut status = if filled > 0 {
            orders::apply_fill(tx, order.order_id, filled).await?
        } else {
            OrderStatus::Pending
        };

        let mut rest = None;
        if plan.remaining > 0 {
            match request.order_type {
                OrderType::Limit => {
                    if filled == 0 {
                        orders::update_status(tx, order.order_id, OrderStatus::Open).await?;
                        status = OrderStatus::Open;
                    }
                    // Residual rests; its reservation stays in place.
                    let price = order.limit_price_in_cents.ok_or_else(|| {
                        StorageError::Invariant(format!("limit order {} without price", order.order_id))
                    })?;
                    rest = Some((
                        request.side,
                        price,
                        RestingOrder {
                            order_id: order.order_id,
                            trader_id: request.trader_id,
                            remaining: plan.remaining,
                            sequence_number: order.sequence_number,
                        },
                    ));
                }
                OrderType::Ioc if limit_price.is_some() => {
                    orders::cancel(tx, order.order_id, CancelReason::IocResidual).await?;
                    status = OrderStatus::Cancelled;
                    let residual_cash = match request.side {
                        Side::Buy => plan.remaining * limit_price.unwrap_or(0),
                        Side::Sell => 0,
                    };
                    settlement::release_residual(
                        tx,
                        request.trader_id,
                        &self.symbol,
                        request.side,
                        plan.remaining,
                        residual_cash,
                    )
                    .await?;
                    outbox::append(
                        tx,
                        &self.symbol,
                        &OutboxEvent::OrderCancelled {
                            order_id: order.order_id,
                            reason: CancelReason::IocResidual,
                        },
                    )
                    .await?;
                }
                // MARKET and priceless IOC: liquidity ran out (or the cash
                // cap was hit); cancel the remainder.
                _ => {
                    orders::cancel(tx, order.order_id, CancelReason::NoLiquidity).await?;
                    status = OrderStatus::Cancelled;
                    if request.side == Side::Sell {
                        positions::release_shares(
                            tx,
                            request.trader_id,
                            &self.symbol,
                            plan.remaining,
                        )
                        .await?;
                    }
                    outbox::append(
                        tx,
                        &self.symbol,
                        &OutboxEvent::OrderCancelled {
                            order_id: order.order_id,
                            reason: CancelReason::NoLiquidity,
                        },
                    )
                    .await?;
                }
            }
        }

        // Market-style buys release whatever the cushion over-reserved,
        // whether or not the order fully filled.
        if market_like && request.side == Side::Buy {
            accounts::release_cash(
                tx,
                request.trader_id,
                reserved_cash - plan.total_cost_in_cents,
            )
            .await?;
        }

        // Prepare the post-commit book and describe it in the outbox.
        let mut book_after = self.book.clone();
        let changed = !plan.fills.is_empty() || rest.is_some();
        book_after.apply(&plan, rest);

        if changed {
            outbox::append(
                tx,
                &self.symbol,
                &OutboxEvent::BookChanged(book_changed_payload(&book_after)),
            )
            .await?;
        }

        let reply = SubmitReply {
            order_id: Some(order.order_id),
            status,
            fills: plan
                .fills
                .iter()
                .map(|fill| FillInfo {
                    maker_order_id: fill.maker_order_id,
                    quantity: fill.quantity as u32,
                    price_in_cents: fill.price_in_cents as u32,
                })
                .collect(),
            rejection_reason: None,
        };

        Ok((reply, book_after))
    }

    /// Cancel path, with the same retry and transactionality rules as
    /// submit.
    async fn handle_cancel(
        &mut self,
        request: &CancelRequest,
    ) -> Result<CancelOutcome, EngineError> {
        let mut attempt = 0;
        let mut delay = Duration::from_millis(self.settings.db_retry_base_ms);

        loop {
            match self.try_cancel(request).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) if err.is_transient() && attempt + 1 < self.settings.db_max_retries => {
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(
                        delay * 2,
                        Duration::from_millis(self.settings.db_retry_max_ms),
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn try_cancel(&mut self, request: &CancelRequest) -> Result<CancelOutcome, EngineError> {
        let mut tx = self.pool.begin().await.map_err(StorageError::from)?;

        match self.run_cancel(&mut tx, request).await {
            Ok((outcome, book_after)) => {
                tx.commit().await.map_err(StorageError::from)?;
                if let Some(book) = book_after {
                    self.book = book;
                }
                Ok(outcome)
            }
            Err(err) => {
                let _ = tx.rollback().await;
                Err(EngineError::Storage(err))
            }
        }
    }

    async fn run_cancel(
        &self,
        tx: &mut Tx<'_>,
        request: &CancelRequest,
    ) -> Result<(CancelOutcome, Option<Book>), StorageError> {
        let Some(order) = orders::get(tx, request.order_id).await? else {
            return Ok((CancelOutcome::Unknown, None));
        };

        // Ownership check; the order's existence is not revealed to
        // other traders.
        if order.trader_id != request.trader_id || order.symbol != self.symbol {
            return Ok((CancelOutcome::Unknown, None));
        }

        if order.status.is_terminal() {
            return Ok((CancelOutcome::AlreadyTerminal, None));
        }

        if order.status == OrderStatus::Pending {
            return Err(StorageError::Invariant(format!(
                "order {} committed with PENDING status",
                order.order_id
            )));
        }

        let row = orders::cancel(tx, request.order_id, request.reason).await?;
        let remaining = row.remaining();

        let reserved_cash_for_remainder = match row.side {
            Side::Buy => {
                let price = row.limit_price_in_cents.ok_or_else(|| {
                    StorageError::Invariant(format!("resting buy {} without price", row.order_id))
                })?;
                remaining * price
            }
            Side::Sell => 0,
        };
        settlement::release_residual(
            tx,
            row.trader_id,
            &self.symbol,
            row.side,
            remaining,
            reserved_cash_for_remainder,
        )
        .await?;

        let event = match request.reason {
            CancelReason::Expired => OutboxEvent::OrderExpired {
                order_id: row.order_id,
            },
            reason => OutboxEvent::OrderCancelled {
                order_id: row.order_id,
                reason,
            },
        };
        outbox::append(tx, &self.symbol, &event).await?;

        let mut book_after = self.book.clone();
        if book_after.cancel(row.order_id).is_none() {
            return Err(StorageError::Invariant(format!(
                "open order {} missing from in-memory book",
                row.order_id
            )));
        }

        outbox::append(
            tx,
            &self.symbol,
            &OutboxEvent::BookChanged(book_changed_payload(&book_after)),
        )
        .await?;

        Ok((CancelOutcome::Cancelled, Some(book_after)))
    }
}

/// MARKET orders and priceless IOC orders cross unconditionally and carry
/// a cushion-based cash reservation.
fn market_like(request: &SubmitRequest) -> bool {
    request.order_type == OrderType::Market
        || (request.order_type == OrderType::Ioc && request.limit_price_in_cents.is_none())
}

fn deadline_elapsed(request: &SubmitRequest) -> bool {
    request
        .deadline
        .map(|deadline| Instant::now() >= deadline)
        .unwrap_or(false)
}

fn book_changed_payload(book: &Book) -> BookChangedPayload {
    let best_bid = book.best_bid();
    let best_ask = book.best_ask();
    BookChangedPayload {
        symbol: book.symbol().to_string(),
        best_bid: best_bid.map(|(price, _)| price),
        best_ask: best_ask.map(|(price, _)| price),
        bid_size: best_bid.map(|(_, qty)| qty),
        ask_size: best_ask.map(|(_, qty)| qty),
        last_price_in_cents: book.last_trade_price(),
    }
}

/// Map resource failures onto their client-visible rejection tokens.
/// Anything unmapped is an infrastructure error.
fn rejection_for(err: &StorageError) -> Option<RejectReason> {
    match err {
        StorageError::TraderNotFound(_) | StorageError::TraderInactive(_) => {
            Some(RejectReason::InactiveTrader)
        }
        StorageError::InsufficientCash { .. } => Some(RejectReason::InsufficientCash),
        StorageError::InsufficientShares { .. } => Some(RejectReason::InsufficientShares),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exchange_common::orders::TraderId;

    #[test]
    fn test_market_like_classification() {
        let trader = TraderId::generate();
        let market = SubmitRequest::market(trader, "@alice", Side::Buy, 5);
        assert!(market_like(&market));

        let limit = SubmitRequest::limit(trader, "@alice", Side::Buy, 5, 500);
        assert!(!market_like(&limit));

        let mut ioc = SubmitRequest::limit(trader, "@alice", Side::Buy, 5, 500);
        ioc.order_type = OrderType::Ioc;
        assert!(!market_like(&ioc));
        ioc.limit_price_in_cents = None;
        assert!(market_like(&ioc));
    }

    #[test]
    fn test_rejection_mapping() {
        let err = StorageError::InsufficientCash {
            needed_in_cents: 100,
            available_in_cents: 50,
        };
        assert_eq!(rejection_for(&err), Some(RejectReason::InsufficientCash));

        let err = StorageError::TraderInactive(TraderId::generate());
        assert_eq!(rejection_for(&err), Some(RejectReason::InactiveTrader));

        let err = StorageError::Invariant("mismatch".to_string());
        assert_eq!(rejection_for(&err), None);
    }

    #[test]
    fn test_deadline_elapsed() {
        let trader = TraderId::generate();
        let mut request = SubmitRequest::market(trader, "@alice", Side::Buy, 1);
        assert!(!deadline_elapsed(&request));

        request.deadline = Some(Instant::now() - Duration::from_millis(5));
        assert!(deadline_elapsed(&request));

        request.deadline = Some(Instant::now() + Duration::from_secs(60));
        assert!(!deadline_elapsed(&request));
    }
}
