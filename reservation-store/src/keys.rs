//! Key-schema builders. Keeping these in one place is the only thing that
//! guarantees the gateway, the worker, and the admin surface agree on the
//! shape of a key (see spec §6, Ledger key schema).

use ethers::types::{Address, TxHash};

fn addr_lower(a: Address) -> String {
    format!("{:#x}", a)
}

/// `spend:{user:<u>:agent:<a>}:<yyyy-mm-dd>`
pub fn spend_key(user: Address, agent: Address, utc_day: &str) -> String {
    format!(
        "spend:{{user:{}:agent:{}}}:{}",
        addr_lower(user),
        addr_lower(agent),
        utc_day
    )
}

/// `pending:{user:<u>:agent:<a>}`
pub fn pending_key(user: Address, agent: Address) -> String {
    format!("pending:{{user:{}:agent:{}}}", addr_lower(user), addr_lower(agent))
}

/// `failed:{user:<u>:agent:<a>}`
pub fn failed_key(user: Address, agent: Address) -> String {
    format!("failed:{{user:{}:agent:{}}}", addr_lower(user), addr_lower(agent))
}

/// `processed:<txHash>` — global namespace, deliberately not nested under a
/// (user, agent) pending key: tx hashes are unique chain-wide and the worker
/// needs to de-dup a replayed pop without knowing which key it came from.
pub fn processed_key(tx_hash: TxHash) -> String {
    format!("processed:{:#x}", tx_hash)
}

/// `anchor:lock`
pub const ANCHOR_LOCK_KEY: &str = "anchor:lock";

/// Parse `user`/`agent` back out of a `pending:{user:<u>:agent:<a>}` style
/// key. Used by the anchor worker when it scans `pending:*`.
pub fn parse_pending_or_failed_key(key: &str) -> Option<(Address, Address)> {
    let inner = key
        .strip_prefix("pending:{")
        .or_else(|| key.strip_prefix("failed:{"))?
        .strip_suffix('}')?;

    let mut parts = inner.split(':');
    if parts.next()? != "user" {
        return None;
    }
    let user = parts.next()?;
    if parts.next()? != "agent" {
        return None;
    }
    let agent = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    let user: Address = user.parse().ok()?;
    let agent: Address = agent.parse().ok()?;
    Some((user, agent))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn spend_key_format() {
        let user = Address::zero();
        let agent = Address::from_low_u64_be(1);
        let key = spend_key(user, agent, "2026-07-28");
        assert!(key.starts_with("spend:{user:0x0"));
        assert!(key.ends_with(":2026-07-28"));
    }

    #[test]
    fn pending_key_round_trips_through_parser() {
        let user = Address::from_str("0x00000000000000000000000000000000000abc").unwrap();
        let agent = Address::from_str("0x00000000000000000000000000000000000def").unwrap();
        let key = pending_key(user, agent);
        let (parsed_user, parsed_agent) = parse_pending_or_failed_key(&key).unwrap();
        assert_eq!(parsed_user, user);
        assert_eq!(parsed_agent, agent);
    }

    #[test]
    fn malformed_key_rejected() {
        assert!(parse_pending_or_failed_key("pending:garbage").is_none());
        assert!(parse_pending_or_failed_key("spend:{user:0x1:agent:0x2}:2026-07-28").is_none());
    }
}
