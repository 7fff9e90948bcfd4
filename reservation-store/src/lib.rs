//! Atomic off-chain spend ledger, pending/failed queues, and the anchor
//! worker's distributed lock, all backed by Redis through a `bb8` pool.
//!
//! This crate deliberately knows nothing about JSON-RPC, policies, or the
//! on-chain registry — it is a thin, well-tested layer over a handful of key
//! schemas. `aegis-firewall` is the only caller.

pub mod errors;
pub mod keys;
pub mod ledger;
pub mod lock;
pub mod pool;
pub mod queue;

pub use errors::ReservationError;
pub use ledger::{current_spend, reserve, rollback};
pub use lock::{release as release_anchor_lock, try_acquire as try_acquire_anchor_lock, AnchorLockGuard, DEFAULT_LOCK_TTL_SECONDS};
pub use pool::{build_pool, ping, RedisPool};
pub use queue::{is_processed, mark_processed, pop_pending_batch, push_failed, push_pending, scan_pending_keys, QueueRecord};

/// Default CAS retry budget for `reserve`/`rollback`, per spec §4.3's
/// "bounded retries (e.g., 6)".
pub const DEFAULT_MAX_RETRIES: u32 = 6;

/// A small convenience facade bundling the pool with the retry budget, so
/// callers in `aegis-firewall` don't have to thread `max_retries` through
/// every call site.
#[derive(Clone)]
pub struct ReservationStore {
    pool: RedisPool,
    max_retries: u32,
}

impl ReservationStore {
    pub async fn connect(redis_url: &str, pool_size: u32) -> Result<Self, ReservationError> {
        let pool = build_pool(redis_url, pool_size).await?;
        Ok(Self { pool, max_retries: DEFAULT_MAX_RETRIES })
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn pool(&self) -> &RedisPool {
        &self.pool
    }

    pub async fn ping(&self) -> Result<(), ReservationError> {
        pool::ping(&self.pool).await
    }

    pub async fn reserve(
        &self,
        user: ethers::types::Address,
        agent: ethers::types::Address,
        amount: ethers::types::U256,
        daily_limit: ethers::types::U256,
    ) -> Result<ethers::types::U256, ReservationError> {
        reserve(&self.pool, user, agent, amount, daily_limit, self.max_retries).await
    }

    pub async fn rollback(
        &self,
        user: ethers::types::Address,
        agent: ethers::types::Address,
        amount: ethers::types::U256,
    ) -> Result<ethers::types::U256, ReservationError> {
        rollback(&self.pool, user, agent, amount, self.max_retries).await
    }

    pub async fn current_spend(
        &self,
        user: ethers::types::Address,
        agent: ethers::types::Address,
    ) -> Result<ethers::types::U256, ReservationError> {
        current_spend(&self.pool, user, agent).await
    }

    pub async fn push_pending(
        &self,
        user: ethers::types::Address,
        agent: ethers::types::Address,
        record: &QueueRecord,
    ) -> Result<(), ReservationError> {
        push_pending(&self.pool, user, agent, record).await
    }

    pub async fn pop_pending_batch(
        &self,
        user: ethers::types::Address,
        agent: ethers::types::Address,
        limit: usize,
    ) -> Result<Vec<QueueRecord>, ReservationError> {
        pop_pending_batch(&self.pool, user, agent, limit).await
    }

    pub async fn push_failed(
        &self,
        user: ethers::types::Address,
        agent: ethers::types::Address,
        record: &QueueRecord,
    ) -> Result<(), ReservationError> {
        push_failed(&self.pool, user, agent, record).await
    }

    pub async fn is_processed(
        &self,
        tx_hash: ethers::types::TxHash,
    ) -> Result<bool, ReservationError> {
        is_processed(&self.pool, tx_hash).await
    }

    pub async fn mark_processed(
        &self,
        tx_hash: ethers::types::TxHash,
    ) -> Result<(), ReservationError> {
        mark_processed(&self.pool, tx_hash).await
    }

    /// Every `(user, agent)` pair with a `pending:*` key currently in the
    /// store, discovered via `SCAN` rather than anything the gateway has
    /// happened to observe — the anchor worker must be able to drain a key
    /// even if this process instance never served the request that filled it.
    pub async fn scan_pending_keys(&self) -> Result<Vec<(ethers::types::Address, ethers::types::Address)>, ReservationError> {
        scan_pending_keys(&self.pool).await
    }

    pub async fn try_acquire_anchor_lock(
        &self,
        token: &str,
    ) -> Result<Option<AnchorLockGuard>, ReservationError> {
        try_acquire_anchor_lock(&self.pool, token, DEFAULT_LOCK_TTL_SECONDS).await
    }

    pub async fn release_anchor_lock(&self, guard: AnchorLockGuard) -> Result<(), ReservationError> {
        release_anchor_lock(&self.pool, guard).await
    }
}
