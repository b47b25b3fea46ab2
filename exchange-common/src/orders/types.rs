//! Core order types and enums for the exchange.
//!
//! This module defines the fundamental types used throughout the exchange:
//! - `Side` - Buy or Sell
//! - `OrderType` - Market, Limit, Ioc
//! - `OrderStatus` - Full lifecycle from Pending to terminal states
//! - `CancelReason` - Why a resting order left the book
//! - Id newtypes for orders, trades, and traders
//!
//! All monetary amounts are integer cents; all quantities are whole shares.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Order side indicating buy or sell direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    /// Buy order - acquire shares
    Buy,
    /// Sell order - dispose of shares
    Sell,
}

impl Side {
    /// Returns the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Returns true if this is a buy order
    pub fn is_buy(&self) -> bool {
        matches!(self, Side::Buy)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BUY" => Some(Side::Buy),
            "SELL" => Some(Side::Sell),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order type determining execution behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    /// Execute immediately at best available prices, never rests
    Market,
    /// Execute at the limit price or better; residual rests in the book
    Limit,
    /// Immediate-or-cancel: fill what crosses now, cancel the remainder
    Ioc,
}

impl OrderType {
    /// Returns true if this order type requires a limit price
    pub fn requires_price(&self) -> bool {
        matches!(self, OrderType::Limit)
    }

    /// Returns true if a limit price is allowed (required or optional)
    pub fn allows_price(&self) -> bool {
        matches!(self, OrderType::Limit | OrderType::Ioc)
    }

    /// Returns true if the residual of a partial fill rests in the book
    pub fn rests(&self) -> bool {
        matches!(self, OrderType::Limit)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
            OrderType::Ioc => "IOC",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MARKET" => Some(OrderType::Market),
            "LIMIT" => Some(OrderType::Limit),
            "IOC" => Some(OrderType::Ioc),
            _ => None,
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order status representing the current state in the order lifecycle.
///
/// State transitions:
/// ```text
/// Pending ─┬→ Open ─┬→ PartiallyFilled ─┬→ Filled
///          │        ├→ Filled           ├→ Cancelled
///          │        ├→ Cancelled        └→ Expired
///          │        └→ Expired
///          ├→ PartiallyFilled / Filled   (matched on arrival)
///          ├→ Cancelled                  (IOC / market residual)
///          └→ Rejected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Order row exists but matching has not resolved it yet
    Pending,
    /// Order rests in the book with no fills
    Open,
    /// Order has fills but quantity remains
    PartiallyFilled,
    /// Order is completely filled (terminal)
    Filled,
    /// Order was cancelled by the owner or by residual cleanup (terminal)
    Cancelled,
    /// Order exceeded its time-in-force (terminal)
    Expired,
    /// Order failed validation and was never booked (terminal)
    Rejected,
}

impl OrderStatus {
    /// Returns true if the order is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Cancelled
                | OrderStatus::Expired
                | OrderStatus::Rejected
        )
    }

    /// Returns true if the order may still rest in or enter the book
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            OrderStatus::Pending | OrderStatus::Open | OrderStatus::PartiallyFilled
        )
    }

    /// Check if a transition from the current status to `target` is valid
    pub fn can_transition_to(&self, target: OrderStatus) -> bool {
        match self {
            OrderStatus::Pending => matches!(
                target,
                OrderStatus::Open
                    | OrderStatus::PartiallyFilled
                    | OrderStatus::Filled
                    | OrderStatus::Cancelled
                    | OrderStatus::Rejected
            ),
            OrderStatus::Open => matches!(
                target,
                OrderStatus::PartiallyFilled
                    | OrderStatus::Filled
                    | OrderStatus::Cancelled
                    | OrderStatus::Expired
            ),
            OrderStatus::PartiallyFilled => matches!(
                target,
                OrderStatus::PartiallyFilled
                    | OrderStatus::Filled
                    | OrderStatus::Cancelled
                    | OrderStatus::Expired
            ),
            // Terminal states cannot transition
            OrderStatus::Filled
            | OrderStatus::Cancelled
            | OrderStatus::Expired
            | OrderStatus::Rejected => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Open => "OPEN",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Expired => "EXPIRED",
            OrderStatus::Rejected => "REJECTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(OrderStatus::Pending),
            "OPEN" => Some(OrderStatus::Open),
            "PARTIALLY_FILLED" => Some(OrderStatus::PartiallyFilled),
            "FILLED" => Some(OrderStatus::Filled),
            "CANCELLED" => Some(OrderStatus::Cancelled),
            "EXPIRED" => Some(OrderStatus::Expired),
            "REJECTED" => Some(OrderStatus::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a resting order was removed from the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelReason {
    /// Cancelled on the owner's request
    User,
    /// Time-in-force elapsed
    Expired,
    /// IOC residual after immediate matching
    IocResidual,
    /// Market order residual once opposite liquidity ran out
    NoLiquidity,
}

impl CancelReason {
    /// Terminal status the order ends in for this reason
    pub fn terminal_status(&self) -> OrderStatus {
        match self {
            CancelReason::Expired => OrderStatus::Expired,
            _ => OrderStatus::Cancelled,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CancelReason::User => "USER",
            CancelReason::Expired => "EXPIRED",
            CancelReason::IocResidual => "IOC_RESIDUAL",
            CancelReason::NoLiquidity => "NO_LIQUIDITY",
        }
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a new random id
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for an order.
    OrderId
);
uuid_id!(
    /// Unique identifier for a trade (a single fill).
    TradeId
);
uuid_id!(
    /// Unique identifier for a trader account.
    TraderId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }

    #[test]
    fn test_order_type_price_requirements() {
        assert!(!OrderType::Market.allows_price());
        assert!(OrderType::Limit.requires_price());
        // IOC may carry a price but does not require one
        assert!(OrderType::Ioc.allows_price());
        assert!(!OrderType::Ioc.requires_price());
    }

    #[test]
    fn test_order_status_terminal() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Expired.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());

        assert!(!OrderStatus::Open.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
    }

    #[test]
    fn test_order_status_transitions() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Open));
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Rejected));
        assert!(OrderStatus::Open.can_transition_to(OrderStatus::Expired));
        assert!(OrderStatus::PartiallyFilled.can_transition_to(OrderStatus::Filled));

        // Invalid transitions
        assert!(!OrderStatus::Filled.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Rejected.can_transition_to(OrderStatus::Open));
        assert!(!OrderStatus::Open.can_transition_to(OrderStatus::Rejected));
    }

    #[test]
    fn test_status_wire_round_trip() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Open,
            OrderStatus::PartiallyFilled,
            OrderStatus::Filled,
            OrderStatus::Cancelled,
            OrderStatus::Expired,
            OrderStatus::Rejected,
        ] {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::parse("PARTIAL"), None);
    }

    #[test]
    fn test_cancel_reason_terminal_status() {
        assert_eq!(CancelReason::User.terminal_status(), OrderStatus::Cancelled);
        assert_eq!(CancelReason::Expired.terminal_status(), OrderStatus::Expired);
        assert_eq!(
            CancelReason::NoLiquidity.terminal_status(),
            OrderStatus::Cancelled
        );
    }
}
