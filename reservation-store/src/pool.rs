//! Connection pool setup.
//!
//! Deliberately built on `bb8_redis::RedisConnectionManager` rather than
//! `redis::aio::MultiplexedConnection`: WATCH/MULTI/EXEC state is per
//! connection, and a multiplexed connection is shared across every caller on
//! the client. Two concurrent `reserve()` calls sharing one multiplexed
//! connection would watch, then silently clobber each other's watch set.
//! bb8 hands each caller an exclusive connection for the lifetime of the
//! checkout, which is the only way WATCH means what it says under
//! concurrency.

use bb8_redis::redis;
use bb8_redis::RedisConnectionManager;

use crate::errors::ReservationError;

pub type RedisPool = bb8::Pool<RedisConnectionManager>;

pub async fn build_pool(redis_url: &str, max_size: u32) -> Result<RedisPool, ReservationError> {
    let manager = RedisConnectionManager::new(redis_url)?;
    let pool = bb8::Pool::builder()
        .max_size(max_size)
        .build(manager)
        .await?;
    Ok(pool)
}

/// Cheap reachability probe for the admin health check — checks out a
/// connection and round-trips a `PING`, without requiring callers outside
/// this crate to depend on `bb8-redis` directly.
pub async fn ping(pool: &RedisPool) -> Result<(), ReservationError> {
    let mut conn = pool.get().await?;
    redis::cmd("PING").query_async::<_, String>(&mut *conn).await?;
    Ok(())
}
