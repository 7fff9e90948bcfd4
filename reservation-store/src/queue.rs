//! Pending/failed FIFO queues and the replay-protection marker.
//!
//! Plain list/string commands through a pooled connection — no Lua, no
//! streams, just LPUSH/RPOP and a TTL'd marker key.

use bb8_redis::redis::{self, AsyncCommands};
use ethers::types::TxHash;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::errors::ReservationError;
use crate::keys::{failed_key, parse_pending_or_failed_key, pending_key, processed_key};
use crate::pool::RedisPool;
use ethers::types::{Address, U256};

/// `processed:<txHash>` markers live for a week — long enough to outlast any
/// plausible reorg-driven or operator-driven replay of the anchor worker.
const PROCESSED_TTL_SECONDS: usize = 7 * 24 * 3600;

/// One accepted request's worth of anchor-bound state. Queued as JSON so the
/// anchor worker doesn't need any schema beyond "parses".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueRecord {
    pub user: Address,
    pub agent: Address,
    pub amount: U256,
    pub method: String,
    pub request_tx_hash: Option<TxHash>,
    pub queued_at_unix: u64,
}

/// Push an accepted request onto its `(user, agent)` pending queue.
#[instrument(skip(pool, record), fields(%user, %agent))]
pub async fn push_pending(
    pool: &RedisPool,
    user: Address,
    agent: Address,
    record: &QueueRecord,
) -> Result<(), ReservationError> {
    let key = pending_key(user, agent);
    let payload = serde_json::to_string(record)
        .map_err(|_| ReservationError::MalformedLedgerValue { key: key.clone() })?;
    let mut conn = pool.get().await?;
    conn.lpush(&key, payload).await?;
    Ok(())
}

/// Pop up to `limit` entries off a pending queue, oldest first (RPOP drains
/// from the tail of an LPUSH-built list, preserving FIFO order).
#[instrument(skip(pool))]
pub async fn pop_pending_batch(
    pool: &RedisPool,
    user: Address,
    agent: Address,
    limit: usize,
) -> Result<Vec<QueueRecord>, ReservationError> {
    let key = pending_key(user, agent);
    let mut conn = pool.get().await?;
    let mut out = Vec::with_capacity(limit);
    for _ in 0..limit {
        let raw: Option<String> = conn.rpop(&key, None).await?;
        match raw {
            None => break,
            Some(raw) => {
                let record: QueueRecord = serde_json::from_str(&raw)
                    .map_err(|_| ReservationError::MalformedLedgerValue { key: key.clone() })?;
                out.push(record);
            }
        }
    }
    Ok(out)
}

/// Move a record to the failed queue after its anchor submission reverted.
#[instrument(skip(pool, record), fields(%user, %agent))]
pub async fn push_failed(
    pool: &RedisPool,
    user: Address,
    agent: Address,
    record: &QueueRecord,
) -> Result<(), ReservationError> {
    let key = failed_key(user, agent);
    let payload = serde_json::to_string(record)
        .map_err(|_| ReservationError::MalformedLedgerValue { key: key.clone() })?;
    let mut conn = pool.get().await?;
    conn.lpush(&key, payload).await?;
    Ok(())
}

/// Read-only check for whether `tx_hash` has already been anchored. Used to
/// skip a replayed record before resubmitting it — never sets the marker
/// itself, so a failed submission never gets mistaken for a processed one.
#[instrument(skip(pool))]
pub async fn is_processed(pool: &RedisPool, tx_hash: TxHash) -> Result<bool, ReservationError> {
    let key = processed_key(tx_hash);
    let mut conn = pool.get().await?;
    let exists: bool = conn.exists(&key).await?;
    Ok(exists)
}

/// Marks `tx_hash` as anchored. Call only after `submit_record_spend` has
/// returned success — the `anchor:lock` already serializes every drain, so
/// there is never a concurrent writer to race against and no `NX` is needed.
#[instrument(skip(pool))]
pub async fn mark_processed(pool: &RedisPool, tx_hash: TxHash) -> Result<(), ReservationError> {
    let key = processed_key(tx_hash);
    let mut conn = pool.get().await?;
    conn.set_ex::<_, _, ()>(&key, "1", PROCESSED_TTL_SECONDS as u64).await?;
    Ok(())
}

/// Cursor-paginated `SCAN MATCH pending:*`, per spec §4.5 step 1 ("list-typed
/// only" — this crate never stores a `pending:*` key as anything but a
/// list, so no `TYPE` filtering is needed beyond the match pattern).
/// Malformed keys (one that matches the glob but doesn't parse back into a
/// `(user, agent)` pair) are dropped with a warning rather than failing the
/// whole scan.
#[instrument(skip(pool))]
pub async fn scan_pending_keys(pool: &RedisPool) -> Result<Vec<(Address, Address)>, ReservationError> {
    let mut conn = pool.get().await?;
    let mut cursor: u64 = 0;
    let mut out = Vec::new();

    loop {
        let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg("pending:*")
            .arg("COUNT")
            .arg(200)
            .query_async(&mut *conn)
            .await?;

        for key in batch {
            match parse_pending_or_failed_key(&key) {
                Some(pair) => out.push(pair),
                None => tracing::warn!(%key, "malformed pending key encountered during scan"),
            }
        }

        if next_cursor == 0 {
            break;
        }
        cursor = next_cursor;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_record_round_trips_through_json() {
        let record = QueueRecord {
            user: Address::zero(),
            agent: Address::from_low_u64_be(7),
            amount: U256::from(42u64),
            method: "eth_sendRawTransaction".to_string(),
            request_tx_hash: None,
            queued_at_unix: 1_700_000_000,
        };
        let json = serde_json::to_string(&record).unwrap();
        let parsed: QueueRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.amount, record.amount);
        assert_eq!(parsed.method, record.method);
    }
}
