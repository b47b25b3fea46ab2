//! Per-symbol order sequence allocation.
//!
//! The counter row is upserted and incremented inside the transaction that
//! inserts the order, so the row lock taken by the update serializes
//! concurrent allocations per symbol. Committed orders therefore carry
//! strictly increasing sequence numbers; aborted transactions may leave
//! gaps, which nothing depends on.

use sqlx::Row;

use super::{StorageResult, Tx};

/// Allocate the next sequence number for `symbol`.
pub async fn next(tx: &mut Tx<'_>, symbol: &str) -> StorageResult<i64> {
    let row = sqlx::query(
        r#"
        INSERT INTO sequence_counters (symbol, next_sequence_number)
        VALUES ($1, 1)
        ON CONFLICT (symbol) DO UPDATE
        SET next_sequence_number = sequence_counters.next_sequence_number + 1
        RETURNING next_sequence_number
        "#,
    )
    .bind(symbol)
    .fetch_one(&mut **tx)
    .await?;

    Ok(row.get("next_sequence_number"))
}
