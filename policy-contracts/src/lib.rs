//! Typed access to the on-chain `PolicyRegistry` contract.
//!
//! The bindings themselves are generated at build time by `build.rs` from
//! `abi/PolicyRegistry.json`; this module only re-exports them and adds the
//! small conveniences the firewall needs (a plain tuple view of the policy,
//! independent of whichever provider/signer type instantiated the contract).

#![allow(clippy::all)]

use ethers::types::{Address, U256};

include!(concat!(env!("OUT_DIR"), "/policyregistry.rs"));

/// Plain-data view of a policy tuple, decoupled from the generated
/// `policyOf` return type so callers don't need to name the contract's
/// provider generic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyTuple {
    pub daily_limit: U256,
    pub current_spend: U256,
    pub last_reset: u64,
    pub is_active: bool,
    pub exists: bool,
}

impl From<(U256, U256, U256, bool, bool)> for PolicyTuple {
    fn from(raw: (U256, U256, U256, bool, bool)) -> Self {
        Self {
            daily_limit: raw.0,
            current_spend: raw.1,
            last_reset: raw.2.as_u64(),
            is_active: raw.3,
            exists: raw.4,
        }
    }
}

/// The identity pair every call into the registry is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PolicyAddressPair {
    pub user: Address,
    pub agent: Address,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tuple_conversion_preserves_fields() {
        let raw = (U256::from(100u64), U256::from(10u64), U256::from(1700000000u64), true, true);
        let tuple: PolicyTuple = raw.into();
        assert_eq!(tuple.daily_limit, U256::from(100u64));
        assert_eq!(tuple.current_spend, U256::from(10u64));
        assert_eq!(tuple.last_reset, 1700000000u64);
        assert!(tuple.is_active);
        assert!(tuple.exists);
    }
}
