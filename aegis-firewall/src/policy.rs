//! Policy Client: reads the on-chain registry and caches the tuple for a
//! short, fixed TTL behind a small struct, rather than calling the
//! generated binding directly from handlers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ethers::contract::Contract;
use ethers::providers::{Http, Provider};
use ethers::types::{Address, U256};
use parking_lot::RwLock;
use policy_contracts::PolicyTuple;
use tracing::instrument;

use crate::errors::AegisError;
use crate::identity::PolicyKey;

/// `HashMap`-backed, not `moka`: the cache only ever needs the last read per
/// key and a TTL of a couple seconds, so the extra dependency and its eviction
/// machinery buy nothing here (Open Question #2 in the grounding ledger).
const CACHE_TTL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy)]
pub struct Policy {
    pub daily_limit: U256,
    pub current_spend_on_chain: U256,
    pub last_reset: u64,
    pub is_active: bool,
    pub exists: bool,
}

impl Policy {
    /// Log-only view. Never used for an admission decision — the reservation
    /// path carries the raw `U256` throughout (Open Question #1).
    pub fn spend_float(&self) -> f64 {
        self.current_spend_on_chain.as_u128() as f64 / 1e18
    }

    pub fn daily_limit_float(&self) -> f64 {
        self.daily_limit.as_u128() as f64 / 1e18
    }
}

impl From<PolicyTuple> for Policy {
    fn from(tuple: PolicyTuple) -> Self {
        Self {
            daily_limit: tuple.daily_limit,
            current_spend_on_chain: tuple.current_spend,
            last_reset: tuple.last_reset,
            is_active: tuple.is_active,
            exists: tuple.exists,
        }
    }
}

struct CacheEntry {
    policy: Policy,
    fetched_at: Instant,
}

pub struct PolicyClient {
    contract: Contract<Provider<Http>>,
    cache: RwLock<HashMap<PolicyKey, CacheEntry>>,
    metrics: firewall_metrics::MetricsRecorder,
}

impl PolicyClient {
    pub fn new(
        provider: Arc<Provider<Http>>,
        contract_address: Address,
        metrics: firewall_metrics::MetricsRecorder,
    ) -> Self {
        let abi = policy_contracts::POLICYREGISTRY_ABI.clone();
        let contract = Contract::new(contract_address, abi, provider);
        Self {
            contract,
            cache: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    #[instrument(skip(self), fields(user = %key.user, agent = %key.agent))]
    pub async fn policy_of(&self, key: PolicyKey) -> Result<Policy, AegisError> {
        if let Some(entry) = self.cache.read().get(&key) {
            if entry.fetched_at.elapsed() < CACHE_TTL {
                return Ok(entry.policy);
            }
        }

        let start = std::time::Instant::now();
        let raw: Result<(U256, U256, U256, bool, bool), AegisError> = async {
            self.contract
                .method::<_, (U256, U256, U256, bool, bool)>("policyOf", (key.user, key.agent))
                .map_err(|err| AegisError::PolicyRead { reason: err.to_string() })?
                .call()
                .await
                .map_err(|err| AegisError::PolicyRead { reason: err.to_string() })
        }
        .await;
        self.metrics.record("policy_read", start.elapsed());
        let raw = raw?;

        let policy: Policy = PolicyTuple::from(raw).into();

        self.cache.write().insert(
            key,
            CacheEntry { policy, fetched_at: Instant::now() },
        );

        Ok(policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spend_float_is_log_only_scaling() {
        let policy = Policy {
            daily_limit: U256::from(10u64).pow(U256::from(18u64)),
            current_spend_on_chain: U256::from(10u64).pow(U256::from(17u64)),
            last_reset: 0,
            is_active: true,
            exists: true,
        };
        assert!((policy.spend_float() - 0.1).abs() < 1e-9);
        assert!((policy.daily_limit_float() - 1.0).abs() < 1e-9);
    }
}
