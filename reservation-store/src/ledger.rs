//! The off-chain spend ledger: a CAS loop over a per-day Redis counter.
//!
//! Same watch-read-compute-commit dance as any Redis-backed throttle over a
//! single counter key. The difference here is the unit of work is a `U256`
//! wei amount instead of a request count, so the counter is stored as its
//! decimal string rather than an integer Redis can INCR natively — `U256`
//! has no native Redis type.

use bb8_redis::redis::{self, AsyncCommands};
use chrono::Utc;
use ethers::types::{Address, U256};
use tracing::{instrument, warn};

use crate::errors::ReservationError;
use crate::keys::spend_key;
use crate::pool::RedisPool;

/// Spend entries expire after 72h; the daily key only needs to live long
/// enough to cover clock skew across a UTC day boundary plus the anchor
/// worker's batch window.
const SPEND_KEY_TTL_SECONDS: usize = 72 * 3600;

fn today_utc() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

/// Reserve `amount` against `(user, agent)`'s remaining balance for today.
///
/// Implements spec §4.3: WATCH the day's spend key, read the current total
/// (defaulting to zero if unset), and if `current + amount` would exceed
/// `daily_limit`, fail without committing anything. Otherwise commit the new
/// total atomically via MULTI/EXEC. If another writer raced us and the
/// transaction aborts, retry up to `max_retries` times.
#[instrument(skip(pool), fields(%user, %agent, %amount))]
pub async fn reserve(
    pool: &RedisPool,
    user: Address,
    agent: Address,
    amount: U256,
    daily_limit: U256,
    max_retries: u32,
) -> Result<U256, ReservationError> {
    let key = spend_key(user, agent, &today_utc());
    let mut conn = pool.get().await?;

    for attempt in 0..=max_retries {
        redis::cmd("WATCH").arg(&key).query_async(&mut *conn).await?;

        let current: Option<String> = conn.get(&key).await?;
        let current = match current {
            None => U256::zero(),
            Some(raw) => U256::from_dec_str(&raw).map_err(|_| {
                ReservationError::MalformedLedgerValue { key: key.clone() }
            })?,
        };

        let new_total = current + amount;
        if new_total > daily_limit {
            redis::cmd("UNWATCH").query_async(&mut *conn).await?;
            return Err(ReservationError::LimitExceeded);
        }

        let mut pipe = redis::pipe();
        pipe.atomic()
            .set(&key, new_total.to_string())
            .ignore()
            .expire(&key, SPEND_KEY_TTL_SECONDS)
            .ignore();

        let result: Option<()> = pipe.query_async(&mut *conn).await?;
        match result {
            Some(()) => return Ok(new_total),
            None => {
                warn!(attempt, "spend reservation CAS aborted, retrying");
                continue;
            }
        }
    }

    Err(ReservationError::RetriesExhausted { retries: max_retries })
}

/// Roll back a reservation that was committed to the ledger but whose
/// upstream forward subsequently failed. Unlike `reserve`, rollback never
/// fails on "limit exceeded" — it always subtracts, floored at zero, since
/// the amount being rolled back was ours to begin with.
#[instrument(skip(pool), fields(%user, %agent, %amount))]
pub async fn rollback(
    pool: &RedisPool,
    user: Address,
    agent: Address,
    amount: U256,
    max_retries: u32,
) -> Result<U256, ReservationError> {
    let key = spend_key(user, agent, &today_utc());
    let mut conn = pool.get().await?;

    for attempt in 0..=max_retries {
        redis::cmd("WATCH").arg(&key).query_async(&mut *conn).await?;

        let current: Option<String> = conn.get(&key).await?;
        let current = match current {
            None => U256::zero(),
            Some(raw) => U256::from_dec_str(&raw).map_err(|_| {
                ReservationError::MalformedLedgerValue { key: key.clone() }
            })?,
        };

        let new_total = current.saturating_sub(amount);

        let mut pipe = redis::pipe();
        pipe.atomic()
            .set(&key, new_total.to_string())
            .ignore()
            .expire(&key, SPEND_KEY_TTL_SECONDS)
            .ignore();

        let result: Option<()> = pipe.query_async(&mut *conn).await?;
        match result {
            Some(()) => return Ok(new_total),
            None => {
                warn!(attempt, "rollback CAS aborted, retrying");
                continue;
            }
        }
    }

    Err(ReservationError::RetriesExhausted { retries: max_retries })
}

/// Read today's committed spend without reserving anything. Used by the
/// admin policy endpoint.
pub async fn current_spend(
    pool: &RedisPool,
    user: Address,
    agent: Address,
) -> Result<U256, ReservationError> {
    let key = spend_key(user, agent, &today_utc());
    let mut conn = pool.get().await?;
    let current: Option<String> = conn.get(&key).await?;
    match current {
        None => Ok(U256::zero()),
        Some(raw) => U256::from_dec_str(&raw)
            .map_err(|_| ReservationError::MalformedLedgerValue { key }),
    }
}
