//! The RPC Gateway: the per-request state machine that parses, resolves
//! identity, checks policy, reserves spend, forwards upstream, and settles
//! the reservation or rolls it back.
//!
//! Batch requests go through `join_all` preserving index order, one
//! `#[instrument]`'d span per request, a single outer `tokio::time::timeout`
//! wrapping the whole pipeline. No balancer or cache machinery here: there
//! is one upstream, not a ranked set of RPC providers.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::http::HeaderMap;
use ethers::types::{Address, U256};
use ethers::utils::rlp::Rlp;
use futures::future::join_all;
use serde_json::value::RawValue;
use tracing::{info, info_span, instrument, Instrument};

use crate::errors::AegisError;
use crate::identity::{resolve_identity, ParsedTx};
use crate::jsonrpc::{
    JsonRpcForwardedResponse, JsonRpcForwardedResponseEnum, JsonRpcHandledResponse, JsonRpcRequest,
    JsonRpcRequestEnum,
};
use crate::state::AegisApp;
use reservation_store::QueueRecord;

const SEND_TRANSACTION: &str = "eth_sendTransaction";
const SEND_RAW_TRANSACTION: &str = "eth_sendRawTransaction";

fn is_intercepted(method: &str) -> bool {
    method == SEND_TRANSACTION || method == SEND_RAW_TRANSACTION
}

fn null_id() -> Box<RawValue> {
    RawValue::from_string("null".to_string()).unwrap()
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Parse `{from, to, value}` out of either a structured `eth_sendTransaction`
/// call object or a signed `eth_sendRawTransaction` envelope.
fn parse_tx(method: &str, params: &serde_json::Value) -> Result<(ParsedTx, U256), AegisError> {
    match method {
        SEND_TRANSACTION => {
            let call = params
                .as_array()
                .and_then(|arr| arr.first())
                .ok_or_else(|| AegisError::ParseFailure { reason: "missing call object".into() })?;

            let from = call
                .get("from")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<Address>().ok());

            let value = match call.get("value").and_then(|v| v.as_str()) {
                Some(hex) => U256::from_str_radix(hex.trim_start_matches("0x"), 16)
                    .map_err(|err| AegisError::ParseFailure { reason: err.to_string() })?,
                None => U256::zero(),
            };

            Ok((ParsedTx { from }, value))
        }
        SEND_RAW_TRANSACTION => {
            let raw_hex = params
                .as_array()
                .and_then(|arr| arr.first())
                .and_then(|v| v.as_str())
                .ok_or_else(|| AegisError::ParseFailure { reason: "missing raw tx".into() })?;

            let bytes = ethers::utils::hex::decode(raw_hex.trim_start_matches("0x"))
                .map_err(|err| AegisError::ParseFailure { reason: err.to_string() })?;

            // A legacy-encoded envelope is a bare RLP list; typed envelopes
            // (EIP-1559/2930) prefix a one-byte transaction type before it.
            // `value`'s list index differs per shape: legacy has no
            // leading chainId field, EIP-2930 adds one, EIP-1559 adds two
            // (maxPriorityFeePerGas/maxFeePerGas replacing gasPrice).
            let (rlp_bytes, value_index): (&[u8], usize) = match bytes.first() {
                Some(0x01) => (&bytes[1..], 5),
                Some(0x02) => (&bytes[1..], 6),
                _ => (&bytes[..], 4),
            };

            let rlp = Rlp::new(rlp_bytes);
            let value: U256 = rlp
                .val_at(value_index)
                .map_err(|err| AegisError::ParseFailure { reason: err.to_string() })?;

            Ok((ParsedTx { from: None }, value))
        }
        _ => unreachable!("parse_tx only called for intercepted methods"),
    }
}

/// 32-byte hex string, either the bare `result` or the first match inside it.
fn extract_tx_hash(result: &RawValue) -> Option<ethers::types::TxHash> {
    let raw = result.get();
    let candidate = raw.trim_matches('"');
    if let Ok(hash) = candidate.parse() {
        return Some(hash);
    }
    // fall back to scanning for a 32-byte hex substring
    let bytes = raw.as_bytes();
    for start in 0..bytes.len() {
        if bytes[start..].len() >= 66 && &bytes[start..start + 2] == b"0x" {
            if let Ok(hash) = raw[start..start + 66].parse() {
                return Some(hash);
            }
        }
    }
    None
}

/// Forward one JSON-RPC request to upstream, byte-preserving the response.
async fn forward_upstream(
    app: &AegisApp,
    request: &JsonRpcRequest,
) -> Result<Box<RawValue>, AegisError> {
    let response = app
        .http_client
        .post(&app.config.upstream_url)
        .json(request)
        .send()
        .await?;

    let body = response.bytes().await?;
    let raw = RawValue::from_string(String::from_utf8_lossy(&body).into_owned())
        .map_err(|err| AegisError::ForwardFailed { reason: err.to_string() })?;
    Ok(raw)
}

/// Run the policy pipeline for one intercepted, non-zero-value
/// request, returning the forwarded response verbatim or an application
/// error in the `-32001..-32003` band.
#[instrument(skip(app, request), fields(method = %request.method))]
async fn run_policy_pipeline(
    app: &AegisApp,
    headers: &HeaderMap,
    request: &JsonRpcRequest,
    tx: ParsedTx,
    amount: U256,
) -> JsonRpcHandledResponse {
    let id = request.id.clone().unwrap_or_else(null_id);

    let key = match resolve_identity(headers, &tx, &app.config.identity_defaults()) {
        Some(key) => key,
        None => {
            let err = AegisError::MalformedRequest { reason: "no identity could be resolved".into() };
            let (_, data) = err.as_response_parts();
            return JsonRpcHandledResponse::Generated(JsonRpcForwardedResponse::from_response_data(data, id));
        }
    };

    let policy = match app.policy_client.policy_of(key).await {
        Ok(policy) => policy,
        Err(err) => {
            let (_, data) = err.as_response_parts();
            return JsonRpcHandledResponse::Generated(JsonRpcForwardedResponse::from_response_data(data, id));
        }
    };

    if !policy.exists {
        let (_, data) = AegisError::NoPolicy.as_response_parts();
        return JsonRpcHandledResponse::Generated(JsonRpcForwardedResponse::from_response_data(data, id));
    }
    if !policy.is_active {
        let (_, data) = AegisError::KillSwitch.as_response_parts();
        return JsonRpcHandledResponse::Generated(JsonRpcForwardedResponse::from_response_data(data, id));
    }

    if let Err(err) = app.reservation_store.reserve(key.user, key.agent, amount, policy.daily_limit).await {
        let aegis_err = match err {
            reservation_store::ReservationError::LimitExceeded => AegisError::LimitExceeded,
            other => AegisError::ReserveFailed { reason: other.to_string() },
        };
        let (_, data) = aegis_err.as_response_parts();
        return JsonRpcHandledResponse::Generated(JsonRpcForwardedResponse::from_response_data(data, id));
    }

    let forward_result = forward_upstream(app, request).await;

    match forward_result {
        Err(err) => {
            if let Err(rollback_err) = app.reservation_store.rollback(key.user, key.agent, amount).await {
                tracing::error!(?rollback_err, "rollback after forward failure also failed");
            }
            let forward_err = AegisError::ForwardFailed { reason: err.to_string() };
            let (_, data) = forward_err.as_response_parts();
            JsonRpcHandledResponse::Generated(JsonRpcForwardedResponse::from_response_data(data, id))
        }
        Ok(raw) => {
            // Parsed only to branch on "does this have an error field" /
            // extract the tx hash for the pending record — the response we
            // actually return is always the untouched `raw` bytes below, per
            // spec §4.1 step 5's "return upstream response verbatim".
            let upstream: serde_json::Value = match serde_json::from_str(raw.get()) {
                Ok(v) => v,
                Err(err) => {
                    if let Err(rollback_err) = app.reservation_store.rollback(key.user, key.agent, amount).await {
                        tracing::error!(?rollback_err, "rollback after malformed upstream body also failed");
                    }
                    let forward_err = AegisError::ForwardFailed { reason: err.to_string() };
                    let (_, data) = forward_err.as_response_parts();
                    return JsonRpcHandledResponse::Generated(JsonRpcForwardedResponse::from_response_data(data, id));
                }
            };

            if upstream.get("error").is_some() {
                if let Err(rollback_err) = app.reservation_store.rollback(key.user, key.agent, amount).await {
                    tracing::error!(?rollback_err, "rollback after upstream error also failed");
                }
                info!(user = %key.user, agent = %key.agent, method = %request.method, outcome = "upstream_error", "admission");
                return JsonRpcHandledResponse::Verbatim(raw);
            }

            let result_raw = upstream.get("result").map(|v| RawValue::from_string(v.to_string()).unwrap());
            let tx_hash = result_raw.as_deref().and_then(extract_tx_hash);

            let record = QueueRecord {
                user: key.user,
                agent: key.agent,
                amount,
                method: request.method.clone(),
                request_tx_hash: tx_hash,
                queued_at_unix: now_ms() / 1000,
            };
            if let Err(err) = app.reservation_store.push_pending(key.user, key.agent, &record).await {
                tracing::error!(?err, "failed to push pending record after successful forward");
            }

            info!(user = %key.user, agent = %key.agent, method = %request.method, outcome = "admitted", "admission");

            JsonRpcHandledResponse::Verbatim(raw)
        }
    }
}

/// Handle a single JSON-RPC object: malformed → `-32600`; non-intercepted →
/// transparent passthrough; zero value → transparent passthrough; otherwise
/// the policy pipeline.
async fn handle_single(app: &AegisApp, headers: &HeaderMap, request: JsonRpcRequest) -> JsonRpcHandledResponse {
    let id = request.id.clone().unwrap_or_else(null_id);

    if request.method.is_empty() {
        let err = AegisError::MalformedRequest { reason: "missing method".into() };
        let (_, data) = err.as_response_parts();
        return JsonRpcHandledResponse::Generated(JsonRpcForwardedResponse::from_response_data(data, id));
    }

    if !is_intercepted(&request.method) {
        return match forward_upstream(app, &request).await {
            Ok(raw) => JsonRpcHandledResponse::Verbatim(raw),
            Err(err) => {
                let (_, data) = err.as_response_parts();
                JsonRpcHandledResponse::Generated(JsonRpcForwardedResponse::from_response_data(data, id))
            }
        };
    }

    let (tx, amount) = match parse_tx(&request.method, &request.params) {
        Ok(parsed) => parsed,
        Err(err) => {
            let (_, data) = err.as_response_parts();
            return JsonRpcHandledResponse::Generated(JsonRpcForwardedResponse::from_response_data(data, id));
        }
    };

    if amount.is_zero() {
        return match forward_upstream(app, &request).await {
            Ok(raw) => JsonRpcHandledResponse::Verbatim(raw),
            Err(err) => {
                let (_, data) = err.as_response_parts();
                JsonRpcHandledResponse::Generated(JsonRpcForwardedResponse::from_response_data(data, id))
            }
        };
    }

    run_policy_pipeline(app, headers, &request, tx, amount).await
}

/// Entry point called by the `/rpc` handler. Batch items run concurrently
/// but the response array preserves input order.
pub async fn proxy_rpc(
    app: Arc<AegisApp>,
    headers: HeaderMap,
    payload: JsonRpcRequestEnum,
) -> JsonRpcForwardedResponseEnum {
    let start = tokio::time::Instant::now();

    let fut = async {
        match payload {
            JsonRpcRequestEnum::Single(request) => {
                JsonRpcForwardedResponseEnum::Single(handle_single(&app, &headers, request).await)
            }
            JsonRpcRequestEnum::Batch(batch) => {
                let futures = batch
                    .into_iter()
                    .map(|request| handle_single(&app, &headers, request));
                let responses = join_all(futures).await;
                JsonRpcForwardedResponseEnum::Batch(responses)
            }
        }
    };

    let timeout = app.config.request_timeout;
    let result = tokio::time::timeout(timeout, fut.instrument(info_span!("proxy_rpc"))).await;
    app.metrics_recorder.record("proxy_request", start.elapsed());

    match result {
        Ok(result) => result,
        Err(_) => {
            let (_, data) = AegisError::ForwardFailed { reason: format!("request exceeded {}s deadline", timeout.as_secs()) }.as_response_parts();
            JsonRpcForwardedResponseEnum::Single(JsonRpcHandledResponse::Generated(
                JsonRpcForwardedResponse::from_response_data(data, null_id()),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_intercepted_matches_only_the_two_send_methods() {
        assert!(is_intercepted(SEND_TRANSACTION));
        assert!(is_intercepted(SEND_RAW_TRANSACTION));
        assert!(!is_intercepted("eth_call"));
        assert!(!is_intercepted("eth_blockNumber"));
    }

    #[test]
    fn parse_tx_defaults_missing_value_to_zero() {
        let params = serde_json::json!([{ "from": "0x0000000000000000000000000000000000000001", "to": "0x0000000000000000000000000000000000000002" }]);
        let (parsed, value) = parse_tx(SEND_TRANSACTION, &params).unwrap();
        assert_eq!(value, U256::zero());
        assert!(parsed.from.is_some());
    }

    #[test]
    fn parse_tx_reads_hex_value_exactly() {
        let params = serde_json::json!([{ "value": "0x2386f26fc10000" }]);
        let (_, value) = parse_tx(SEND_TRANSACTION, &params).unwrap();
        assert_eq!(value, U256::from(0x2386f26fc10000u64));
    }

    #[test]
    fn extract_tx_hash_from_bare_result() {
        let valid = RawValue::from_string(format!("\"0x{}\"", "00".repeat(32))).unwrap();
        assert!(extract_tx_hash(&valid).is_some());
    }

    #[test]
    fn extract_tx_hash_returns_none_without_a_32_byte_hex_string() {
        let raw = RawValue::from_string("\"not a hash\"".to_string()).unwrap();
        assert!(extract_tx_hash(&raw).is_none());
    }

    /// `parse_tx` must read `value` bit-exact out of a raw legacy-encoded
    /// envelope (no leading transaction-type byte), not drift onto a
    /// neighboring field like `data` or `v`.
    #[test]
    fn parse_tx_reads_value_from_legacy_raw_envelope() {
        let params = serde_json::json!([
            "0xea018504a817c8008252089300000000000000000000000000000000000002872386f26fc10000801b0101"
        ]);
        let (_, value) = parse_tx(SEND_RAW_TRANSACTION, &params).unwrap();
        assert_eq!(value, U256::from(0x2386f26fc10000u64));
    }

    /// Same bit-exactness requirement for an EIP-1559 (type `0x02`) envelope,
    /// whose `value` sits two fields further in than the legacy shape.
    #[test]
    fn parse_tx_reads_value_from_eip1559_raw_envelope() {
        let params = serde_json::json!([
            "0x02f10101843b9aca008504a817c8008252089300000000000000000000000000000000000002872386f26fc1000080c0800101"
        ]);
        let (_, value) = parse_tx(SEND_RAW_TRANSACTION, &params).unwrap();
        assert_eq!(value, U256::from(0x2386f26fc10000u64));
    }
}
