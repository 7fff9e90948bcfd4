//! Property-style concurrency tests for the spend ledger CAS loop.
//!
//! These run against a real Redis — `REDIS_URL` (default
//! `redis://127.0.0.1:6379/14`) — since the real WATCH/MULTI/EXEC semantics
//! aren't meaningfully testable against a mock. Skipped with a message
//! rather than failing the suite when no Redis is reachable.

use ethers::types::{Address, U256};
use reservation_store::{reserve, rollback, ReservationError};
use reservation_store::build_pool;
use tokio::task::JoinSet;

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/14".to_string())
}

async fn pool_or_skip() -> Option<reservation_store::RedisPool> {
    match build_pool(&redis_url(), 32).await {
        Ok(pool) => Some(pool),
        Err(err) => {
            eprintln!("skipping ledger concurrency test: no redis reachable ({err})");
            None
        }
    }
}

fn fresh_identity(tag: u64) -> (Address, Address) {
    // low_u64_be keeps every concurrent test run on its own (user, agent)
    // pair so runs sharing a Redis instance don't clobber each other's keys.
    let nonce = tag.wrapping_mul(0x9E3779B97F4A7C15).wrapping_add(1);
    (Address::from_low_u64_be(nonce), Address::from_low_u64_be(nonce ^ 0xA5A5))
}

/// For any set of concurrent `reserve` calls starting from zero, the final
/// ledger value equals the sum of the successful ones and never exceeds the
/// daily limit — spec §8's core safety invariant.
#[tokio::test]
async fn concurrent_reserves_never_exceed_daily_limit() {
    let Some(pool) = pool_or_skip().await else { return };
    let (user, agent) = fresh_identity(1);
    let daily_limit = U256::from(1_000u64);
    let per_call = U256::from(120u64);
    let attempts = 20usize; // 20 * 120 = 2400, well over the 1000 limit

    let mut set = JoinSet::new();
    for _ in 0..attempts {
        let pool = pool.clone();
        set.spawn(async move { reserve(&pool, user, agent, per_call, daily_limit, 10).await });
    }

    let mut successes = 0u64;
    while let Some(res) = set.join_next().await {
        match res.unwrap() {
            Ok(_) => successes += 1,
            Err(ReservationError::LimitExceeded) => {}
            Err(other) => panic!("unexpected reservation error: {other}"),
        }
    }

    let total = reservation_store::current_spend(&pool, user, agent).await.unwrap();
    assert_eq!(total, per_call * successes);
    assert!(total <= daily_limit, "ledger value {total} exceeded daily limit {daily_limit}");
}

/// `rollback` after `reserve` returns the ledger to its pre-reserve value;
/// rolling back twice without a matching reserve never underflows below zero.
#[tokio::test]
async fn rollback_is_monotone_and_floors_at_zero() {
    let Some(pool) = pool_or_skip().await else { return };
    let (user, agent) = fresh_identity(2);
    let daily_limit = U256::from(500u64);
    let amount = U256::from(100u64);

    let before = reservation_store::current_spend(&pool, user, agent).await.unwrap();
    reserve(&pool, user, agent, amount, daily_limit, 6).await.unwrap();
    rollback(&pool, user, agent, amount, 6).await.unwrap();
    let after = reservation_store::current_spend(&pool, user, agent).await.unwrap();
    assert_eq!(before, after);

    rollback(&pool, user, agent, amount, 6).await.unwrap();
    rollback(&pool, user, agent, amount, 6).await.unwrap();
    let floored = reservation_store::current_spend(&pool, user, agent).await.unwrap();
    assert_eq!(floored, U256::zero());
}

/// Amount exactly equal to remaining quota admits; one wei over rejects.
#[tokio::test]
async fn boundary_amount_at_quota_admits_one_over_rejects() {
    let Some(pool) = pool_or_skip().await else { return };
    let (user, agent) = fresh_identity(3);
    let daily_limit = U256::from(100u64);

    let total = reserve(&pool, user, agent, daily_limit, daily_limit, 6).await.unwrap();
    assert_eq!(total, daily_limit);

    let err = reserve(&pool, user, agent, U256::from(1u64), daily_limit, 6).await.unwrap_err();
    assert!(matches!(err, ReservationError::LimitExceeded));

    let unchanged = reservation_store::current_spend(&pool, user, agent).await.unwrap();
    assert_eq!(unchanged, daily_limit);
}
