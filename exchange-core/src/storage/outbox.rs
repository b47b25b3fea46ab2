//! Market-data outbox.
//!
//! Events are appended in the same transaction as the state change they
//! describe; a separate publisher marks `published_at` and is outside this
//! crate. Payloads are typed structs serialized to JSONB.

use chrono::{DateTime, Utc};
use serde::Serialize;

use exchange_common::orders::{CancelReason, OrderId, TradeId, TraderId};

use super::trades::TradeRecord;
use super::{StorageError, StorageResult, Tx};

/// Payload of a `TRADE_EXECUTED` event.
#[derive(Debug, Clone, Serialize)]
pub struct TradeExecutedPayload {
    pub symbol: String,
    pub trade_id: TradeId,
    pub price_in_cents: i64,
    pub quantity: i64,
    pub buyer_id: TraderId,
    pub seller_id: TraderId,
    pub maker_order_id: OrderId,
    pub taker_order_id: OrderId,
    pub executed_at: DateTime<Utc>,
}

impl From<&TradeRecord> for TradeExecutedPayload {
    fn from(trade: &TradeRecord) -> Self {
        Self {
            symbol: trade.symbol.clone(),
            trade_id: trade.trade_id,
            price_in_cents: trade.price_in_cents,
            quantity: trade.quantity,
            buyer_id: trade.buyer_id,
            seller_id: trade.seller_id,
            maker_order_id: trade.maker_order_id,
            taker_order_id: trade.taker_order_id,
            executed_at: trade.executed_at,
        }
    }
}

/// Payload of an `ORDER_ACCEPTED` event.
#[derive(Debug, Clone, Serialize)]
pub struct OrderAcceptedPayload {
    pub order_id: OrderId,
    pub symbol: String,
    pub side: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub quantity: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price_in_cents: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Payload of a `BOOK_CHANGED` event.
#[derive(Debug, Clone, Serialize)]
pub struct BookChangedPayload {
    pub symbol: String,
    pub best_bid: Option<i64>,
    pub best_ask: Option<i64>,
    pub bid_size: Option<i64>,
    pub ask_size: Option<i64>,
    pub last_price_in_cents: Option<i64>,
}

/// A market-data event awaiting publication.
#[derive(Debug, Clone)]
pub enum OutboxEvent {
    TradeExecuted(TradeExecutedPayload),
    OrderAccepted(OrderAcceptedPayload),
    OrderCancelled { order_id: OrderId, reason: CancelReason },
    OrderExpired { order_id: OrderId },
    BookChanged(BookChangedPayload),
}

impl OutboxEvent {
    /// Wire tag stored in `event_type`.
    pub fn event_type(&self) -> &'static str {
        match self {
            OutboxEvent::TradeExecuted(_) => "TRADE_EXECUTED",
            OutboxEvent::OrderAccepted(_) => "ORDER_ACCEPTED",
            OutboxEvent::OrderCancelled { .. } => "ORDER_CANCELLED",
            OutboxEvent::OrderExpired { .. } => "ORDER_EXPIRED",
            OutboxEvent::BookChanged(_) => "BOOK_CHANGED",
        }
    }

    fn payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            OutboxEvent::TradeExecuted(p) => serde_json::to_value(p),
            OutboxEvent::OrderAccepted(p) => serde_json::to_value(p),
            OutboxEvent::OrderCancelled { order_id, reason } => Ok(serde_json::json!({
                "order_id": order_id,
                "reason": reason.as_str(),
            })),
            OutboxEvent::OrderExpired { order_id } => Ok(serde_json::json!({
                "order_id": order_id,
            })),
            OutboxEvent::BookChanged(p) => serde_json::to_value(p),
        }
    }
}

/// Append one event with `published_at = NULL`.
pub async fn append(tx: &mut Tx<'_>, symbol: &str, event: &OutboxEvent) -> StorageResult<()> {
    let payload = event
        .payload()
        .map_err(|e| StorageError::Invariant(format!("unserializable outbox payload: {e}")))?;

    sqlx::query(
        r#"
        INSERT INTO market_data_outbox (symbol, event_type, payload)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(symbol)
    .bind(event.event_type())
    .bind(payload)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_tags() {
        let event = OutboxEvent::OrderExpired {
            order_id: OrderId::generate(),
        };
        assert_eq!(event.event_type(), "ORDER_EXPIRED");

        let event = OutboxEvent::OrderCancelled {
            order_id: OrderId::generate(),
            reason: CancelReason::NoLiquidity,
        };
        assert_eq!(event.event_type(), "ORDER_CANCELLED");
    }

    #[test]
    fn test_cancelled_payload_shape() {
        let order_id = OrderId::generate();
        let event = OutboxEvent::OrderCancelled {
            order_id,
            reason: CancelReason::User,
        };
        let payload = event.payload().unwrap();
        assert_eq!(payload["reason"], "USER");
        assert_eq!(payload["order_id"], serde_json::json!(order_id));
    }

    #[test]
    fn test_accepted_payload_uses_type_key() {
        let event = OutboxEvent::OrderAccepted(OrderAcceptedPayload {
            order_id: OrderId::generate(),
            symbol: "@alice".to_string(),
            side: "BUY".to_string(),
            order_type: "LIMIT".to_string(),
            quantity: 10,
            limit_price_in_cents: Some(500),
            created_at: Utc::now(),
        });
        let payload = event.payload().unwrap();
        assert_eq!(payload["type"], "LIMIT");
        assert_eq!(payload["limit_price_in_cents"], 500);
    }
}
