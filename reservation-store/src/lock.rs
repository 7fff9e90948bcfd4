//! The distributed lock that keeps at most one anchor worker iterating at a
//! time across a fleet of gateway instances.
//!
//! `SET key val NX EX ttl` is the standard single-key Redis lock idiom; this
//! doesn't reach for Redlock-across-instances since only one writer at a
//! time against a single Redis needs guarding here, not fault tolerance
//! against a partitioned Redis cluster.

use bb8_redis::redis::{self, AsyncCommands};
use tracing::instrument;

use crate::errors::ReservationError;
use crate::keys::ANCHOR_LOCK_KEY;
use crate::pool::RedisPool;

/// How long a held lock is valid for before another worker may steal it.
/// Must comfortably exceed one anchor iteration's worst-case wall time
/// (batch submit + confirmation wait across up to `anchor_batch_size` keys).
pub const DEFAULT_LOCK_TTL_SECONDS: usize = 120;

/// An RAII-ish guard: holds the token used to release the lock and nothing
/// else. Dropping it without calling `release` just lets the TTL expire,
/// which is the safe default if the worker panics mid-iteration.
pub struct AnchorLockGuard {
    token: String,
}

/// Attempt to acquire the singleton anchor lock. Returns `None` if another
/// worker currently holds it.
#[instrument(skip(pool))]
pub async fn try_acquire(
    pool: &RedisPool,
    token: &str,
    ttl_seconds: usize,
) -> Result<Option<AnchorLockGuard>, ReservationError> {
    let mut conn = pool.get().await?;
    let acquired: Option<String> = redis::cmd("SET")
        .arg(ANCHOR_LOCK_KEY)
        .arg(token)
        .arg("NX")
        .arg("EX")
        .arg(ttl_seconds)
        .query_async(&mut *conn)
        .await?;

    Ok(acquired.map(|_| AnchorLockGuard { token: token.to_string() }))
}

/// Release the lock, but only if we're still the holder — a compare-and-del
/// via a read-then-conditional-delete, guarding against releasing a lock
/// that expired and was re-acquired by another worker in the meantime.
#[instrument(skip(pool, guard))]
pub async fn release(pool: &RedisPool, guard: AnchorLockGuard) -> Result<(), ReservationError> {
    let mut conn = pool.get().await?;
    let held: Option<String> = conn.get(ANCHOR_LOCK_KEY).await?;
    if held.as_deref() == Some(guard.token.as_str()) {
        conn.del::<_, ()>(ANCHOR_LOCK_KEY).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    // Exercised end-to-end in `aegis-firewall`'s anchor worker tests against
    // a real Redis; there is no useful unit-level behavior to assert here
    // without one.
}
