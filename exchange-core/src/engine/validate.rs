//! Synchronous intent validation and reservation arithmetic.
//!
//! Everything here runs before the database transaction opens; a rejection
//! from this module persists nothing.

use exchange_common::orders::{OrderType, RejectReason, SubmitRequest};

/// Validate the shape of a submit request.
///
/// Symbol membership is checked by the router; trader existence and
/// activity are checked inside the transaction where the row can be locked.
pub fn validate_submit(request: &SubmitRequest) -> Result<(), RejectReason> {
    if request.quantity == 0 {
        return Err(RejectReason::InvalidQuantity);
    }

    match (request.order_type, request.limit_price_in_cents) {
        (OrderType::Limit, None) => return Err(RejectReason::InvalidPrice),
        (OrderType::Market, Some(_)) => return Err(RejectReason::InvalidPrice),
        (_, Some(0)) => return Err(RejectReason::InvalidPrice),
        _ => {}
    }

    if request.tif_seconds.is_some() && request.order_type != OrderType::Limit {
        return Err(RejectReason::InvalidPrice);
    }

    Ok(())
}

/// Worst-case cash estimate for a market buy: `qty * reference_ask`
/// scaled by the slippage cushion, rounded up. The reference is the ask
/// level the fill would have to reach ([`crate::book::Book::marginal_ask_price`]);
/// any over-estimate is acceptable, and the cushion bounds how far past
/// it a market order may walk.
pub fn market_reserve_estimate(quantity: i64, reference_ask_in_cents: i64, cushion: f64) -> i64 {
    let base = (quantity * reference_ask_in_cents) as f64;
    (base * cushion).ceil() as i64
}
