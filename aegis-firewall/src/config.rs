//! Typed configuration, built once at startup: env vars parsed eagerly with
//! `anyhow::Context`, refusing to start on any missing required field. No
//! TOML surface here — this system carries no simulator/template config.

use std::fmt;
use std::time::Duration;

use anyhow::Context;
use ethers::types::Address;

use crate::identity::IdentityDefaults;

/// Wraps a value that must never show up in a log line or a `--check-config`
/// dump — the facilitator private key and the admin bearer token both land
/// here instead of as bare `String` fields.
#[derive(Clone)]
pub struct RedactedSecret(pub String);

impl fmt::Debug for RedactedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("REDACTED")
    }
}

impl std::ops::Deref for RedactedSecret {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorMode {
    /// Stop after the first successful anchor per invocation. Caps gas
    /// spend in demos; every other batched record is left pending.
    OneShot,
    /// Drain every `pending:*` key to exhaustion each iteration.
    Continuous,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub upstream_url: String,
    pub contract_address: Address,
    pub admin_default_user: Option<Address>,
    pub admin_default_agent: Option<Address>,
    pub facilitator_key: RedactedSecret,
    pub kv_url: String,
    pub anchor_epoch_seconds: u64,
    pub anchor_batch_size: usize,
    pub anchor_secret: RedactedSecret,
    pub anchor_mode: AnchorMode,
    pub listen_port: u16,
    pub request_timeout: Duration,
    pub reserve_max_retries: u32,
}

fn required(name: &str) -> anyhow::Result<String> {
    std::env::var(name).with_context(|| format!("missing required env var {name}"))
}

fn optional_u64(name: &str, default: u64) -> anyhow::Result<u64> {
    match std::env::var(name) {
        Ok(raw) => raw.parse().with_context(|| format!("{name} must be an integer")),
        Err(_) => Ok(default),
    }
}

fn optional_address(name: &str) -> anyhow::Result<Option<Address>> {
    match std::env::var(name) {
        Ok(raw) => Ok(Some(raw.parse().with_context(|| format!("{name} must be a 0x address"))?)),
        Err(_) => Ok(None),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let upstream_url = required("AEGIS_UPSTREAM_RPC")?;
        let contract_address: Address = required("AEGIS_CONTRACT_ADDRESS")?
            .parse()
            .context("AEGIS_CONTRACT_ADDRESS must be a 0x address")?;
        let facilitator_key = RedactedSecret(required("AEGIS_FACILITATOR_KEY")?);
        let kv_url = required("AEGIS_KV_URL")?;

        let admin_default_user = optional_address("AEGIS_ADMIN_DEFAULT_USER")?;
        let admin_default_agent = optional_address("AEGIS_ADMIN_DEFAULT_AGENT")?;

        let anchor_epoch_seconds = optional_u64("AEGIS_ANCHOR_EPOCH_SECONDS", 900)?;
        let anchor_batch_size = optional_u64("AEGIS_ANCHOR_BATCH_SIZE", 20)? as usize;
        let anchor_secret = RedactedSecret(std::env::var("AEGIS_ANCHOR_SECRET").unwrap_or_default());
        let listen_port = optional_u64("AEGIS_LISTEN_PORT", 8080)? as u16;
        let request_timeout_secs = optional_u64("AEGIS_REQUEST_TIMEOUT_SECONDS", 10)?;
        let reserve_max_retries = optional_u64("AEGIS_RESERVE_MAX_RETRIES", 6)? as u32;

        let anchor_mode = match std::env::var("AEGIS_ANCHOR_MODE").as_deref() {
            Ok("continuous") => AnchorMode::Continuous,
            Ok("one-shot") | Err(_) => AnchorMode::OneShot,
            Ok(other) => anyhow::bail!("AEGIS_ANCHOR_MODE must be \"one-shot\" or \"continuous\", got {other:?}"),
        };

        Ok(Self {
            upstream_url,
            contract_address,
            admin_default_user,
            admin_default_agent,
            facilitator_key,
            kv_url,
            anchor_epoch_seconds,
            anchor_batch_size,
            anchor_secret,
            anchor_mode,
            listen_port,
            request_timeout: Duration::from_secs(request_timeout_secs),
            reserve_max_retries,
        })
    }

    pub fn identity_defaults(&self) -> IdentityDefaults {
        IdentityDefaults {
            user: self.admin_default_user,
            agent: self.admin_default_agent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // `std::env` is process-global; these tests share a mutex so they don't
    // stomp on each other's vars when the suite runs multithreaded.
    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    const REQUIRED: &[(&str, &str)] = &[
        ("AEGIS_UPSTREAM_RPC", "https://rpc.example.test"),
        ("AEGIS_CONTRACT_ADDRESS", "0x0000000000000000000000000000000000000abc"),
        ("AEGIS_FACILITATOR_KEY", "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690"),
        ("AEGIS_KV_URL", "redis://127.0.0.1:6379"),
    ];

    fn clear_optional() {
        for name in [
            "AEGIS_ADMIN_DEFAULT_USER",
            "AEGIS_ADMIN_DEFAULT_AGENT",
            "AEGIS_ANCHOR_EPOCH_SECONDS",
            "AEGIS_ANCHOR_BATCH_SIZE",
            "AEGIS_ANCHOR_SECRET",
            "AEGIS_LISTEN_PORT",
            "AEGIS_REQUEST_TIMEOUT_SECONDS",
            "AEGIS_RESERVE_MAX_RETRIES",
            "AEGIS_ANCHOR_MODE",
        ] {
            std::env::remove_var(name);
        }
    }

    #[test_log::test]
    fn missing_required_field_refuses_to_start() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_optional();
        for (name, _) in REQUIRED {
            std::env::remove_var(name);
        }
        // deliberately leave AEGIS_FACILITATOR_KEY unset
        for (name, value) in REQUIRED.iter().filter(|(n, _)| *n != "AEGIS_FACILITATOR_KEY") {
            std::env::set_var(name, value);
        }

        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("AEGIS_FACILITATOR_KEY"));

        for (name, _) in REQUIRED {
            std::env::remove_var(name);
        }
    }

    #[test_log::test]
    fn optional_fields_fall_back_to_documented_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_optional();
        for (name, value) in REQUIRED {
            std::env::set_var(name, value);
        }

        let config = Config::from_env().unwrap();
        assert_eq!(config.anchor_epoch_seconds, 900);
        assert_eq!(config.anchor_batch_size, 20);
        assert_eq!(config.listen_port, 8080);
        assert_eq!(config.reserve_max_retries, 6);
        assert_eq!(config.anchor_mode, AnchorMode::OneShot);
        assert_eq!(config.request_timeout, Duration::from_secs(10));

        for (name, _) in REQUIRED {
            std::env::remove_var(name);
        }
    }

    #[test_log::test]
    fn unrecognized_anchor_mode_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_optional();
        for (name, value) in REQUIRED {
            std::env::set_var(name, value);
        }
        std::env::set_var("AEGIS_ANCHOR_MODE", "sometimes");

        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("one-shot"));

        for (name, _) in REQUIRED {
            std::env::remove_var(name);
        }
        std::env::remove_var("AEGIS_ANCHOR_MODE");
    }

    #[test_log::test]
    fn facilitator_key_is_redacted_in_debug_output() {
        let secret = RedactedSecret("super-secret-key".to_string());
        assert_eq!(format!("{secret:?}"), "REDACTED");
    }
}
