//! Admin Surface: health, policy inspection, and a bearer-guarded one-shot
//! anchor trigger. Handlers use the usual `Extension<Arc<App>>` + bare
//! `Response` shape, with no rate-limiter/stats plumbing — this firewall
//! has exactly one class of caller, not many unauthenticated API consumers.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::Path;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use ethers::types::Address;
use firewall_metrics::LatencySnapshot;
use serde::Serialize;
use tracing::warn;

use crate::anchor::run_one_iteration;
use crate::identity::PolicyKey;
use crate::state::AegisApp;

const ANCHOR_HARD_TIMEOUT: Duration = Duration::from_secs(120);

fn bearer_matches(headers: &HeaderMap, expected: &str) -> bool {
    if expected.is_empty() {
        // an unset secret means the one-shot endpoint is unconfigured, not
        // open — never treat a blank config value as "no auth required".
        return false;
    }
    let Some(value) = headers.get(axum::http::header::AUTHORIZATION) else {
        return false;
    };
    let Ok(value) = value.to_str() else {
        return false;
    };
    value.strip_prefix("Bearer ") == Some(expected)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    ok: bool,
    redis: bool,
    upstream: bool,
    proxy_request_latency: LatencySnapshot,
    anchor_iteration_latency: LatencySnapshot,
    policy_read_latency: LatencySnapshot,
}

/// `GET /admin/health`: reachability of Redis (`PING`) and the upstream RPC
/// (`eth_blockNumber`), per spec §4.6, plus the rolling latency snapshots
/// `firewall-metrics` already tracks for the gateway, anchor worker, and
/// policy client — an operator watching this endpoint shouldn't need a
/// separate metrics scrape to notice a latency regression alongside an
/// outright reachability failure.
pub async fn health(Extension(app): Extension<Arc<AegisApp>>) -> Response {
    let redis_ok = match app.reservation_store.ping().await {
        Ok(()) => true,
        Err(err) => {
            warn!(?err, "admin health check: redis ping failed");
            false
        }
    };

    let upstream_ok = app
        .http_client
        .post(&app.config.upstream_url)
        .json(&serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "eth_blockNumber", "params": []}))
        .send()
        .await
        .map(|resp| resp.status().is_success())
        .unwrap_or(false);

    let body = HealthResponse {
        ok: redis_ok && upstream_ok,
        redis: redis_ok,
        upstream: upstream_ok,
        proxy_request_latency: app.metrics.proxy_request(),
        anchor_iteration_latency: app.metrics.anchor_iteration(),
        policy_read_latency: app.metrics.policy_read(),
    };
    let status = if body.ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(body)).into_response()
}

#[derive(Debug, Serialize)]
struct PolicyInspection {
    daily_limit_wei: String,
    daily_limit_eth: f64,
    current_spend_onchain_wei: String,
    current_spend_onchain_eth: f64,
    reserved_today_wei: String,
    last_reset: u64,
    is_active: bool,
    exists: bool,
}

/// `GET /admin/policy/:user/:agent`: reads the policy tuple plus derived
/// human-readable amounts. Bearer-guarded like the anchor trigger — the
/// tuple tells an operator another user's configured limit, which is not
/// public information.
pub async fn policy(
    Extension(app): Extension<Arc<AegisApp>>,
    headers: HeaderMap,
    Path((user, agent)): Path<(Address, Address)>,
) -> Response {
    if !bearer_matches(&headers, &app.config.anchor_secret) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let key = PolicyKey { user, agent };
    let policy = match app.policy_client.policy_of(key).await {
        Ok(policy) => policy,
        Err(err) => {
            warn!(?err, "admin policy inspection: policy read failed");
            return (StatusCode::BAD_GATEWAY, Json(serde_json::json!({ "error": err.to_string() }))).into_response();
        }
    };

    let reserved_today = match app.reservation_store.current_spend(user, agent).await {
        Ok(v) => v,
        Err(err) => {
            warn!(?err, "admin policy inspection: failed to read reservation ledger");
            ethers::types::U256::zero()
        }
    };

    let body = PolicyInspection {
        daily_limit_wei: policy.daily_limit.to_string(),
        daily_limit_eth: policy.daily_limit_float(),
        current_spend_onchain_wei: policy.current_spend_on_chain.to_string(),
        current_spend_onchain_eth: policy.spend_float(),
        reserved_today_wei: reserved_today.to_string(),
        last_reset: policy.last_reset,
        is_active: policy.is_active,
        exists: policy.exists,
    };

    (StatusCode::OK, Json(body)).into_response()
}

#[derive(Debug, Serialize)]
struct AnchorTriggerResponse {
    processed: usize,
    scanned: usize,
    txs: Vec<String>,
}

/// `POST /admin/anchor`: bearer-guarded one-shot trigger. Returns `409` if
/// the anchor lock is already held (another instance or the periodic
/// worker is mid-iteration), otherwise runs exactly one iteration under a
/// 120s hard timeout, per spec §4.6.
pub async fn trigger_anchor(Extension(app): Extension<Arc<AegisApp>>, headers: HeaderMap) -> Response {
    if !bearer_matches(&headers, &app.config.anchor_secret) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let token = uuid::Uuid::new_v4().to_string();
    let guard = match app.reservation_store.try_acquire_anchor_lock(&token).await {
        Ok(Some(guard)) => guard,
        Ok(None) => return StatusCode::CONFLICT.into_response(),
        Err(err) => {
            warn!(?err, "admin anchor trigger: failed to acquire lock");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let result = tokio::time::timeout(ANCHOR_HARD_TIMEOUT, run_one_iteration(&app)).await;

    if let Err(err) = app.reservation_store.release_anchor_lock(guard).await {
        warn!(?err, "admin anchor trigger: failed to release lock");
    }

    match result {
        Ok(Ok(outcome)) => {
            let body = AnchorTriggerResponse { processed: outcome.processed, scanned: outcome.scanned, txs: outcome.txs };
            (StatusCode::OK, Json(body)).into_response()
        }
        Ok(Err(err)) => {
            warn!(?err, "admin anchor trigger: iteration failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(_) => StatusCode::GATEWAY_TIMEOUT.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_matches_requires_exact_token() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, HeaderValue::from_static("Bearer secret123"));
        assert!(bearer_matches(&headers, "secret123"));
        assert!(!bearer_matches(&headers, "othersecret"));
    }

    #[test]
    fn bearer_matches_rejects_blank_configured_secret() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, HeaderValue::from_static("Bearer anything"));
        assert!(!bearer_matches(&headers, ""));
    }

    #[test]
    fn bearer_matches_rejects_missing_header() {
        let headers = HeaderMap::new();
        assert!(!bearer_matches(&headers, "secret123"));
    }
}
