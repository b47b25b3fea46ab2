//! Settlement: atomic application of one fill to ledger, positions,
//! accounts, orders, and the outbox.
//!
//! A thin façade over the stores, separated so the full effect of a fill
//! can be tested as a unit. Contract: the caller owns the transaction;
//! either every effect of a fill plan commits or none do.

use exchange_common::orders::{OrderStatus, Side, TraderId};

use crate::storage::{accounts, ledger, orders, outbox, positions, trades, StorageResult, Tx};
use crate::storage::outbox::{OutboxEvent, TradeExecutedPayload};
use crate::storage::trades::TradeRecord;

/// Settle one fill: persist the trade, post both ledger legs, move cash and
/// shares, update the maker's order row, and append the `TRADE_EXECUTED`
/// event. Returns the maker's resulting order status.
///
/// For buy takers with a limit price, the per-fill price improvement
/// (`limit - trade price`) times the quantity is released back to the
/// buyer; maker buys reserved exactly at their own price, so they never
/// over-reserve.
pub async fn settle_fill(
    tx: &mut Tx<'_>,
    trade: &TradeRecord,
    taker_side: Side,
    taker_limit_price_in_cents: Option<i64>,
) -> StorageResult<OrderStatus> {
    let cost = trade.price_in_cents * trade.quantity;

    trades::insert(tx, trade).await?;
    ledger::post_trade_entries(tx, trade).await?;

    // Buyer leg: reserved cash becomes spent cash, shares arrive.
    accounts::settle_buy(tx, trade.buyer_id, cost).await?;
    positions::apply_buy_fill(
        tx,
        trade.buyer_id,
        &trade.symbol,
        trade.quantity,
        trade.price_in_cents,
    )
    .await?;

    // Seller leg: reserved shares become delivered shares, cash arrives.
    positions::apply_sell_fill(tx, trade.seller_id, &trade.symbol, trade.quantity).await?;
    accounts::settle_sell(tx, trade.seller_id, cost).await?;

    // A buy taker that bid above the maker's price gets the difference back.
    if taker_side == Side::Buy {
        if let Some(limit) = taker_limit_price_in_cents {
            let over_reserve = (limit - trade.price_in_cents) * trade.quantity;
            if over_reserve > 0 {
                accounts::release_cash(tx, trade.buyer_id, over_reserve).await?;
            }
        }
    }

    let maker_status = orders::apply_fill(tx, trade.maker_order_id, trade.quantity).await?;

    outbox::append(
        tx,
        &trade.symbol,
        &OutboxEvent::TradeExecuted(TradeExecutedPayload::from(trade)),
    )
    .await?;

    Ok(maker_status)
}

/// Release whatever a cancelled or expired order still has earmarked.
pub async fn release_residual(
    tx: &mut Tx<'_>,
    trader_id: TraderId,
    symbol: &str,
    side: Side,
    remaining: i64,
    reserved_cash_for_remainder: i64,
) -> StorageResult<()> {
    match side {
        Side::Buy => {
            if reserved_cash_for_remainder > 0 {
                accounts::release_cash(tx, trader_id, reserved_cash_for_remainder).await?;
            }
        }
        Side::Sell => {
            if remaining > 0 {
                positions::release_shares(tx, trader_id, symbol, remaining).await?;
            }
        }
    }
    Ok(())
}
