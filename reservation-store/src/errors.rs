use bb8_redis::redis;
use derive_more::{Display, Error, From};

/// Errors surfaced by the reservation store. The gateway maps these onto
/// the `-32001..-32003` JSON-RPC band; see `aegis-firewall::errors`.
#[derive(Debug, Display, Error, From)]
pub enum ReservationError {
    /// `new = current + amount` would exceed `dailyLimit`. Nothing was
    /// committed — the caller never reserved anything to roll back.
    #[display(fmt = "reservation would exceed daily limit")]
    #[error(ignore)]
    #[from(ignore)]
    LimitExceeded,

    /// The CAS loop exhausted its retry budget without a clean commit.
    #[display(fmt = "reservation failed after {retries} retries")]
    #[error(ignore)]
    #[from(ignore)]
    RetriesExhausted { retries: u32 },

    Redis(redis::RedisError),
    Pool(bb8::RunError<redis::RedisError>),

    #[display(fmt = "malformed ledger value at key {key}")]
    #[error(ignore)]
    #[from(ignore)]
    MalformedLedgerValue { key: String },
}
