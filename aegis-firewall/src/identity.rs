//! Identity resolution: turning request headers + a parsed transaction into
//! the `(user, agent)` pair a policy is evaluated against.
//!
//! Kept as a pure function, per Design Notes §9 ("replace ad-hoc
//! header/body fallback with an explicit resolver... so the priority is
//! testable in isolation") — no network or store access belongs here.

use axum::http::HeaderMap;
use ethers::types::Address;

pub const USER_HEADER: &str = "x-aegis-user";
pub const AGENT_HEADER: &str = "x-aegis-agent";

/// Fields pulled out of an intercepted transaction, prior to identity
/// resolution. `from` is the only field this module reads; `to`/`value` are
/// carried through the rest of the pipeline by the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParsedTx {
    pub from: Option<Address>,
}

/// Configured fallback identities, used only when neither a header nor the
/// transaction supplies a value.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityDefaults {
    pub user: Option<Address>,
    pub agent: Option<Address>,
}

/// The (user, agent) pair a policy is keyed by. Lowercased at construction
/// via `ethers::types::Address`'s own `Display`, so every caller downstream
/// sees the same string regardless of how the address was cased on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PolicyKey {
    pub user: Address,
    pub agent: Address,
}

fn header_address(headers: &HeaderMap, name: &str) -> Option<Address> {
    headers
        .get(name)?
        .to_str()
        .ok()?
        .parse::<Address>()
        .ok()
}

/// Resolve `(user, agent)` per spec §3's priority: per-field header override,
/// then the transaction's `from` for the user half only, then configured
/// defaults, else `None` (caller must fail closed with `MalformedRequest`).
pub fn resolve_identity(
    headers: &HeaderMap,
    tx: &ParsedTx,
    defaults: &IdentityDefaults,
) -> Option<PolicyKey> {
    let user = header_address(headers, USER_HEADER)
        .or(tx.from)
        .or(defaults.user)?;

    let agent = header_address(headers, AGENT_HEADER).or(defaults.agent)?;

    Some(PolicyKey { user, agent })
}
