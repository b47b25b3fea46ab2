//! Wire-level request and reply types for the exchange router.
//!
//! These are the only shapes adaptors (REST handlers, agent clients, the
//! expiration scheduler) exchange with the engine. Everything is a tagged
//! struct or enum; no untyped maps cross this boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tokio::time::Instant;

use super::types::{CancelReason, OrderId, OrderStatus, OrderType, Side, TraderId};

/// Stable rejection tokens surfaced to submitters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    InvalidQuantity,
    InvalidPrice,
    UnknownSymbol,
    InactiveTrader,
    InsufficientCash,
    InsufficientShares,
    NoLiquidity,
    Busy,
    Timeout,
    Internal,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::InvalidQuantity => "INVALID_QUANTITY",
            RejectReason::InvalidPrice => "INVALID_PRICE",
            RejectReason::UnknownSymbol => "UNKNOWN_SYMBOL",
            RejectReason::InactiveTrader => "INACTIVE_TRADER",
            RejectReason::InsufficientCash => "INSUFFICIENT_CASH",
            RejectReason::InsufficientShares => "INSUFFICIENT_SHARES",
            RejectReason::NoLiquidity => "NO_LIQUIDITY",
            RejectReason::Busy => "BUSY",
            RejectReason::Timeout => "TIMEOUT",
            RejectReason::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to place an order, as accepted by the router.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub trader_id: TraderId,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: u32,
    /// Required for LIMIT, optional for IOC, forbidden for MARKET
    pub limit_price_in_cents: Option<u32>,
    /// LIMIT only; `None` means good-till-cancel
    pub tif_seconds: Option<u32>,
    /// If the intent is still queued past this instant it is dropped
    pub deadline: Option<Instant>,
}

impl SubmitRequest {
    /// Convenience constructor for a limit order.
    pub fn limit(
        trader_id: TraderId,
        symbol: impl Into<String>,
        side: Side,
        quantity: u32,
        limit_price_in_cents: u32,
    ) -> Self {
        Self {
            trader_id,
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            quantity,
            limit_price_in_cents: Some(limit_price_in_cents),
            tif_seconds: None,
            deadline: None,
        }
    }

    /// Convenience constructor for a market order.
    pub fn market(
        trader_id: TraderId,
        symbol: impl Into<String>,
        side: Side,
        quantity: u32,
    ) -> Self {
        Self {
            trader_id,
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            quantity,
            limit_price_in_cents: None,
            tif_seconds: None,
            deadline: None,
        }
    }

    pub fn with_tif(mut self, tif_seconds: u32) -> Self {
        self.tif_seconds = Some(tif_seconds);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// One fill reported back to the submitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillInfo {
    pub maker_order_id: OrderId,
    pub quantity: u32,
    pub price_in_cents: u32,
}

/// Reply to a submit request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitReply {
    /// Absent when the order was rejected before persisting
    pub order_id: Option<OrderId>,
    pub status: OrderStatus,
    pub fills: Vec<FillInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<RejectReason>,
}

impl SubmitReply {
    /// Build a rejection reply; nothing was persisted.
    pub fn rejected(reason: RejectReason) -> Self {
        Self {
            order_id: None,
            status: OrderStatus::Rejected,
            fills: Vec::new(),
            rejection_reason: Some(reason),
        }
    }
}

/// A request to cancel a resting order.
#[derive(Debug, Clone)]
pub struct CancelRequest {
    pub trader_id: TraderId,
    pub order_id: OrderId,
    pub reason: CancelReason,
}

/// Outcome of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelOutcome {
    /// The order was open and is now cancelled (or expired)
    Cancelled,
    /// The order had already reached a terminal state
    AlreadyTerminal,
    /// No such order, or the order belongs to another trader
    Unknown,
}

impl fmt::Display for CancelOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelOutcome::Cancelled => f.write_str("CANCELLED"),
            CancelOutcome::AlreadyTerminal => f.write_str("ALREADY_TERMINAL"),
            CancelOutcome::Unknown => f.write_str("UNKNOWN"),
        }
    }
}

/// Point-in-time view of one symbol's book.
///
/// Depth maps are keyed by price in cents and hold the total resting
/// quantity at that level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub symbol: String,
    pub bids: BTreeMap<i64, i64>,
    pub asks: BTreeMap<i64, i64>,
    pub last_price_in_cents: Option<i64>,
    pub best_bid: Option<i64>,
    pub best_ask: Option<i64>,
    /// Total quantity resting at the best bid
    pub bid_size: Option<i64>,
    /// Total quantity resting at the best ask
    pub ask_size: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

impl BookSnapshot {
    /// Bid-ask spread in cents, when both sides are populated.
    pub fn spread(&self) -> Option<i64> {
        match (self.best_bid, self.best_ask) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }
}
