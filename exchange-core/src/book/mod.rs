//! In-memory price-time-sequence order book for one symbol.
//!
//! The book is exclusively owned by that symbol's engine task; nothing else
//! mutates it. Matching is split into a pure simulation ([`Book::plan`])
//! that computes fills without touching the book, and a mutation step
//! ([`Book::apply`]) the engine runs only after the database transaction
//! commits. A failed commit therefore leaves the book exactly as it was.

mod price_level;

pub use price_level::{PriceLevel, RestingOrder};

use chrono::Utc;
use std::collections::{BTreeMap, HashMap};

use exchange_common::orders::{BookSnapshot, OrderId, Side, TraderId};

/// What the matcher needs to know about an incoming taker.
#[derive(Debug, Clone)]
pub struct TakerIntent {
    pub order_id: OrderId,
    pub trader_id: TraderId,
    pub side: Side,
    pub quantity: i64,
    /// Crossing bound for LIMIT/IOC; `None` for MARKET
    pub limit_price_in_cents: Option<i64>,
    /// Spend ceiling for cash-capped MARKET buys; matching stops before the
    /// cumulative cost would exceed it
    pub cash_cap_in_cents: Option<i64>,
}

/// One planned fill against a resting maker. Crossing price is always the
/// maker's price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFill {
    pub maker_order_id: OrderId,
    pub maker_trader_id: TraderId,
    pub quantity: i64,
    pub price_in_cents: i64,
}

/// Outcome of simulating a taker against the book.
#[derive(Debug, Clone, Default)]
pub struct MatchPlan {
    pub fills: Vec<PlannedFill>,
    pub remaining: i64,
    pub total_cost_in_cents: i64,
}

impl MatchPlan {
    pub fn filled_quantity(&self) -> i64 {
        self.fills.iter().map(|f| f.quantity).sum()
    }
}

/// Per-symbol book: two sides of price levels plus an id index for O(1)
/// cancellation.
#[derive(Debug, Clone)]
pub struct Book {
    symbol: String,
    /// Buy side; iterated descending (best bid = highest price)
    bids: BTreeMap<i64, PriceLevel>,
    /// Sell side; iterated ascending (best ask = lowest price)
    asks: BTreeMap<i64, PriceLevel>,
    /// order_id -> (side, price) for resting orders
    index: HashMap<OrderId, (Side, i64)>,
    last_trade_price: Option<i64>,
}

impl Book {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            index: HashMap::new(),
            last_trade_price: None,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn last_trade_price(&self) -> Option<i64> {
        self.last_trade_price
    }

    /// Seed the last trade price during recovery.
    pub fn set_last_trade_price(&mut self, price_in_cents: Option<i64>) {
        self.last_trade_price = price_in_cents;
    }

    fn side_mut(&mut self, side: Side) -> &mut BTreeMap<i64, PriceLevel> {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    /// Insert a resting order at the tail of its price level.
    pub fn add(&mut self, side: Side, price_in_cents: i64, order: RestingOrder) {
        debug_assert!(order.remaining > 0);
        self.index.insert(order.order_id, (side, price_in_cents));
        self.side_mut(side)
            .entry(price_in_cents)
            .or_default()
            .push_back(order);
    }

    /// Remove a resting order. Returns its remaining quantity; no-op when
    /// the order is not resting.
    pub fn cancel(&mut self, order_id: OrderId) -> Option<i64> {
        let (side, price) = self.index.remove(&order_id)?;
        let levels = self.side_mut(side);
        let level = levels.get_mut(&price)?;
        let remaining = level.remove(order_id);
        if level.is_empty() {
            levels.remove(&price);
        }
        remaining
    }

    /// Best resting order on the given side.
    pub fn peek_best(&self, side: Side) -> Option<&RestingOrder> {
        match side {
            Side::Buy => self.bids.iter().next_back().and_then(|(_, l)| l.front()),
            Side::Sell => self.asks.iter().next().and_then(|(_, l)| l.front()),
        }
    }

    /// Best bid price and total quantity at that level.
    pub fn best_bid(&self) -> Option<(i64, i64)> {
        self.bids
            .iter()
            .next_back()
            .map(|(price, level)| (*price, level.total_quantity()))
    }

    /// Best ask price and total quantity at that level.
    pub fn best_ask(&self) -> Option<(i64, i64)> {
        self.asks
            .iter()
            .next()
            .map(|(price, level)| (*price, level.total_quantity()))
    }

    /// Ask price a buy of `qty` shares would have to reach: the price of
    /// the level at which cumulative ask liquidity covers `qty`, or the
    /// deepest ask when the book is shallower. `None` on an empty ask
    /// side. Used to size market-buy cash reservations.
    pub fn marginal_ask_price(&self, qty: i64) -> Option<i64> {
        let mut covered = 0;
        let mut worst = None;
        for (&price, level) in self.asks.iter() {
            worst = Some(price);
            covered += level.total_quantity();
            if covered >= qty {
                break;
            }
        }
        worst
    }

    /// Returns true if `order_id` currently rests in the book.
    pub fn contains(&self, order_id: OrderId) -> bool {
        self.index.contains_key(&order_id)
    }

    /// Total resting orders across both sides.
    pub fn resting_order_count(&self) -> usize {
        self.index.len()
    }

    /// Simulate matching `taker` against the current book without mutating
    /// it.
    ///
    /// Walks opposite-side levels best-first; within a level, ascending
    /// sequence. Makers owned by the taker's trader are skipped (self-trade
    /// prevention); since nothing is mutated here, skipped makers keep
    /// their queue position. Stops at the limit price, at quantity zero, at
    /// the cash cap, or when liquidity runs out.
    pub fn plan(&self, taker: &TakerIntent) -> MatchPlan {
        let mut plan = MatchPlan {
            fills: Vec::new(),
            remaining: taker.quantity,
            total_cost_in_cents: 0,
        };

        let crosses = |level_price: i64| match taker.limit_price_in_cents {
            None => true,
            Some(limit) => match taker.side {
                Side::Buy => level_price <= limit,
                Side::Sell => level_price >= limit,
            },
        };

        // Iterate the opposite side best-first. Two iterators with a
        // common walk keeps borrow scopes simple.
        let levels: Vec<(&i64, &PriceLevel)> = match taker.side {
            Side::Buy => self.asks.iter().collect(),
            Side::Sell => self.bids.iter().rev().collect(),
        };

        'levels: for (&price, level) in levels {
            if plan.remaining == 0 || !crosses(price) {
                break;
            }

            for maker in level.iter() {
                if plan.remaining == 0 {
                    break 'levels;
                }
                if maker.trader_id == taker.trader_id {
                    continue;
                }

                let mut cross_qty = plan.remaining.min(maker.remaining);

                if let Some(cap) = taker.cash_cap_in_cents {
                    let budget = cap - plan.total_cost_in_cents;
                    let affordable = budget / price;
                    if affordable == 0 {
                        // Deeper levels only cost more; nothing left to spend.
                        break 'levels;
                    }
                    cross_qty = cross_qty.min(affordable);
                }

                plan.total_cost_in_cents += cross_qty * price;
                plan.remaining -= cross_qty;
                plan.fills.push(PlannedFill {
                    maker_order_id: maker.order_id,
                    maker_trader_id: maker.trader_id,
                    quantity: cross_qty,
                    price_in_cents: price,
                });
            }
        }

        plan
    }

    /// Apply a committed plan to the book: consume maker quantity and, for
    /// limit takers with residual, rest the taker.
    pub fn apply(&mut self, plan: &MatchPlan, rest: Option<(Side, i64, RestingOrder)>) {
        for fill in &plan.fills {
            self.reduce(fill.maker_order_id, fill.quantity);
        }

        if let Some(fill) = plan.fills.last() {
            self.last_trade_price = Some(fill.price_in_cents);
        }

        if let Some((side, price, order)) = rest {
            self.add(side, price, order);
        }
    }

    fn reduce(&mut self, order_id: OrderId, qty: i64) {
        let Some(&(side, price)) = self.index.get(&order_id) else {
            debug_assert!(false, "reduce on order not in book");
            return;
        };

        let levels = self.side_mut(side);
        if let Some(level) = levels.get_mut(&price) {
            level.reduce(order_id, qty);
            if level.is_empty() {
                levels.remove(&price);
            }
        }

        let consumed = levels
            .get(&price)
            .map(|l| l.iter().all(|o| o.order_id != order_id))
            .unwrap_or(true);
        if consumed {
            self.index.remove(&order_id);
        }
    }

    /// Pure read of the current book state.
    pub fn snapshot(&self) -> BookSnapshot {
        let aggregate = |levels: &BTreeMap<i64, PriceLevel>| {
            levels
                .iter()
                .map(|(price, level)| (*price, level.total_quantity()))
                .collect()
        };

        let best_bid = self.best_bid();
        let best_ask = self.best_ask();

        BookSnapshot {
            symbol: self.symbol.clone(),
            bids: aggregate(&self.bids),
            asks: aggregate(&self.asks),
            last_price_in_cents: self.last_trade_price,
            best_bid: best_bid.map(|(p, _)| p),
            best_ask: best_ask.map(|(p, _)| p),
            bid_size: best_bid.map(|(_, q)| q),
            ask_size: best_ask.map(|(_, q)| q),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resting(trader_id: TraderId, remaining: i64, sequence_number: i64) -> RestingOrder {
        RestingOrder {
            order_id: OrderId::generate(),
            trader_id,
            remaining,
            sequence_number,
        }
    }

    fn market_buy(trader_id: TraderId, quantity: i64) -> TakerIntent {
        TakerIntent {
            order_id: OrderId::generate(),
            trader_id,
            side: Side::Buy,
            quantity,
            limit_price_in_cents: None,
            cash_cap_in_cents: None,
        }
    }

    fn limit(trader_id: TraderId, side: Side, quantity: i64, price: i64) -> TakerIntent {
        TakerIntent {
            order_id: OrderId::generate(),
            trader_id,
            side,
            quantity,
            limit_price_in_cents: Some(price),
            cash_cap_in_cents: None,
        }
    }

    #[test]
    fn test_limit_buy_below_best_ask_does_not_cross() {
        let mut book = Book::new("@alice");
        book.add(Side::Sell, 510, resting(TraderId::generate(), 10, 1));

        let plan = book.plan(&limit(TraderId::generate(), Side::Buy, 5, 500));
        assert!(plan.fills.is_empty());
        assert_eq!(plan.remaining, 5);
    }

    #[test]
    fn test_limit_cross_uses_maker_price() {
        let mut book = Book::new("@alice");
        let maker = TraderId::generate();
        book.add(Side::Sell, 500, resting(maker, 10, 1));

        // Taker willing to pay 520 still crosses at the maker's 500
        let plan = book.plan(&limit(TraderId::generate(), Side::Buy, 10, 520));
        assert_eq!(plan.fills.len(), 1);
        assert_eq!(plan.fills[0].price_in_cents, 500);
        assert_eq!(plan.fills[0].quantity, 10);
        assert_eq!(plan.remaining, 0);
        assert_eq!(plan.total_cost_in_cents, 5000);
    }

    #[test]
    fn test_market_buy_walks_levels_in_price_order() {
        let mut book = Book::new("@alice");
        book.add(Side::Sell, 510, resting(TraderId::generate(), 7, 2));
        book.add(Side::Sell, 500, resting(TraderId::generate(), 3, 1));

        let plan = book.plan(&market_buy(TraderId::generate(), 5));
        assert_eq!(plan.fills.len(), 2);
        assert_eq!(plan.fills[0].price_in_cents, 500);
        assert_eq!(plan.fills[0].quantity, 3);
        assert_eq!(plan.fills[1].price_in_cents, 510);
        assert_eq!(plan.fills[1].quantity, 2);
        assert_eq!(plan.total_cost_in_cents, 3 * 500 + 2 * 510);
    }

    #[test]
    fn test_same_price_fifo_by_sequence() {
        let mut book = Book::new("@alice");
        let first = resting(TraderId::generate(), 4, 1);
        let second = resting(TraderId::generate(), 4, 2);
        let first_id = first.order_id;
        book.add(Side::Sell, 500, first);
        book.add(Side::Sell, 500, second);

        let plan = book.plan(&market_buy(TraderId::generate(), 4));
        assert_eq!(plan.fills.len(), 1);
        assert_eq!(plan.fills[0].maker_order_id, first_id);
    }

    #[test]
    fn test_self_trade_skipped_and_next_maker_used() {
        let mut book = Book::new("@alice");
        let trader = TraderId::generate();
        let other = TraderId::generate();
        let own = resting(trader, 5, 1);
        let own_id = own.order_id;
        let theirs = resting(other, 5, 2);
        let theirs_id = theirs.order_id;
        book.add(Side::Sell, 500, own);
        book.add(Side::Sell, 500, theirs);

        let plan = book.plan(&limit(trader, Side::Buy, 5, 500));
        assert_eq!(plan.fills.len(), 1);
        assert_eq!(plan.fills[0].maker_order_id, theirs_id);

        // The skipped self-order keeps its queue position
        assert!(book.contains(own_id));
        assert_eq!(book.peek_best(Side::Sell).unwrap().order_id, own_id);
    }

    #[test]
    fn test_self_trade_only_liquidity_means_no_fill() {
        let mut book = Book::new("@alice");
        let trader = TraderId::generate();
        book.add(Side::Sell, 500, resting(trader, 10, 1));

        let plan = book.plan(&limit(trader, Side::Buy, 10, 500));
        assert!(plan.fills.is_empty());
        assert_eq!(plan.remaining, 10);
    }

    #[test]
    fn test_cash_cap_stops_matching() {
        let mut book = Book::new("@alice");
        book.add(Side::Sell, 500, resting(TraderId::generate(), 3, 1));
        book.add(Side::Sell, 510, resting(TraderId::generate(), 7, 2));

        let mut taker = market_buy(TraderId::generate(), 10);
        // Enough for the 3 @ 500 and two more at 510
        taker.cash_cap_in_cents = Some(3 * 500 + 2 * 510 + 9);

        let plan = book.plan(&taker);
        assert_eq!(plan.filled_quantity(), 5);
        assert_eq!(plan.remaining, 5);
        assert!(plan.total_cost_in_cents <= taker.cash_cap_in_cents.unwrap());
    }

    #[test]
    fn test_apply_consumes_makers_and_rests_taker() {
        let mut book = Book::new("@alice");
        let maker = resting(TraderId::generate(), 3, 1);
        let maker_id = maker.order_id;
        book.add(Side::Sell, 500, maker);

        let taker = limit(TraderId::generate(), Side::Buy, 5, 500);
        let plan = book.plan(&taker);
        assert_eq!(plan.filled_quantity(), 3);
        assert_eq!(plan.remaining, 2);

        // Book untouched until apply
        assert!(book.contains(maker_id));

        let rest = RestingOrder {
            order_id: taker.order_id,
            trader_id: taker.trader_id,
            remaining: plan.remaining,
            sequence_number: 2,
        };
        book.apply(&plan, Some((Side::Buy, 500, rest)));

        assert!(!book.contains(maker_id));
        assert!(book.contains(taker.order_id));
        assert_eq!(book.best_bid(), Some((500, 2)));
        assert_eq!(book.best_ask(), None);
        assert_eq!(book.last_trade_price(), Some(500));
    }

    #[test]
    fn test_apply_partial_maker_consumption() {
        let mut book = Book::new("@alice");
        let maker = resting(TraderId::generate(), 10, 1);
        let maker_id = maker.order_id;
        book.add(Side::Sell, 500, maker);

        let plan = book.plan(&market_buy(TraderId::generate(), 4));
        book.apply(&plan, None);

        assert!(book.contains(maker_id));
        assert_eq!(book.best_ask(), Some((500, 6)));
    }

    #[test]
    fn test_marginal_ask_price_walks_depth() {
        let mut book = Book::new("@alice");
        assert_eq!(book.marginal_ask_price(5), None);

        book.add(Side::Sell, 500, resting(TraderId::generate(), 3, 1));
        book.add(Side::Sell, 510, resting(TraderId::generate(), 7, 2));

        // Fits in the best level
        assert_eq!(book.marginal_ask_price(3), Some(500));
        // Needs the second level
        assert_eq!(book.marginal_ask_price(5), Some(510));
        // Deeper than the book: worst available level
        assert_eq!(book.marginal_ask_price(100), Some(510));
    }

    #[test]
    fn test_cancel_removes_and_is_noop_when_absent() {
        let mut book = Book::new("@alice");
        let order = resting(TraderId::generate(), 5, 1);
        let id = order.order_id;
        book.add(Side::Buy, 490, order);

        assert_eq!(book.cancel(id), Some(5));
        assert_eq!(book.cancel(id), None);
        assert_eq!(book.best_bid(), None);
    }

    #[test]
    fn test_snapshot_aggregates_levels() {
        let mut book = Book::new("@alice");
        book.add(Side::Buy, 490, resting(TraderId::generate(), 5, 1));
        book.add(Side::Buy, 490, resting(TraderId::generate(), 2, 2));
        book.add(Side::Buy, 480, resting(TraderId::generate(), 1, 3));
        book.add(Side::Sell, 510, resting(TraderId::generate(), 4, 4));

        let snapshot = book.snapshot();
        assert_eq!(snapshot.bids.get(&490), Some(&7));
        assert_eq!(snapshot.bids.get(&480), Some(&1));
        assert_eq!(snapshot.asks.get(&510), Some(&4));
        assert_eq!(snapshot.best_bid, Some(490));
        assert_eq!(snapshot.best_ask, Some(510));
        assert_eq!(snapshot.bid_size, Some(7));
        assert_eq!(snapshot.ask_size, Some(4));
    }
}
