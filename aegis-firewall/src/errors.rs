//! Utilities for logging errors for admins and displaying errors to callers.

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use derive_more::{Display, Error, From};
use serde_json::value::RawValue;
use tracing::{error, trace, warn};

use crate::jsonrpc::{JsonRpcErrorData, JsonRpcForwardedResponse, JsonRpcResponseEnum};

pub type AegisResult<T> = Result<T, AegisError>;

/// Every kind from the firewall's error-handling design, mapped to a JSON-RPC
/// application code via `as_response_parts`.
#[derive(Debug, Display, Error, From)]
pub enum AegisError {
    #[display(fmt = "malformed request: {reason}")]
    #[error(ignore)]
    #[from(ignore)]
    MalformedRequest { reason: String },

    #[display(fmt = "transaction parse failure: {reason}")]
    #[error(ignore)]
    #[from(ignore)]
    ParseFailure { reason: String },

    #[display(fmt = "policy read failed: {reason}")]
    #[error(ignore)]
    #[from(ignore)]
    PolicyRead { reason: String },

    #[display(fmt = "no policy registered for this (user, agent) pair")]
    #[error(ignore)]
    #[from(ignore)]
    NoPolicy,

    #[display(fmt = "policy is kill-switched")]
    #[error(ignore)]
    #[from(ignore)]
    KillSwitch,

    #[display(fmt = "reservation would exceed daily limit")]
    #[error(ignore)]
    #[from(ignore)]
    LimitExceeded,

    #[display(fmt = "reservation failed: {reason}")]
    #[error(ignore)]
    #[from(ignore)]
    ReserveFailed { reason: String },

    #[display(fmt = "forward to upstream failed: {reason}")]
    #[error(ignore)]
    #[from(ignore)]
    ForwardFailed { reason: String },

    #[display(fmt = "anchor submission failed: {reason}")]
    #[error(ignore)]
    #[from(ignore)]
    AnchorSubmit { reason: String },

    #[display(fmt = "anchor transaction reverted: {reason}")]
    #[error(ignore)]
    #[from(ignore)]
    AnchorRevert { reason: String },

    #[display(fmt = "malformed queue record: {reason}")]
    #[error(ignore)]
    #[from(ignore)]
    MalformedQueueRecord { reason: String },

    #[display(fmt = "fatal: {reason}")]
    #[error(ignore)]
    #[from(ignore)]
    Fatal { reason: String },

    Reservation(reservation_store::ReservationError),
    Contract(ethers::contract::ContractError<ethers::providers::Provider<ethers::providers::Http>>),
    Reqwest(reqwest::Error),
    Json(serde_json::Error),
}

impl AegisError {
    /// `(application-defined JSON-RPC code, JsonRpcErrorData)`. Codes follow
    /// the allocation table in spec §6.
    pub fn as_response_parts(&self) -> (i64, JsonRpcResponseEnum) {
        let (code, message): (i64, String) = match self {
            Self::MalformedRequest { reason } => {
                trace!(%reason, "MalformedRequest");
                (-32600, format!("Aegis: MALFORMED_REQUEST: {reason}"))
            }
            Self::ParseFailure { reason } => {
                trace!(%reason, "ParseFailure");
                (-32602, format!("Aegis: PARSE_FAILURE: {reason}"))
            }
            Self::PolicyRead { reason } => {
                warn!(%reason, "PolicyRead");
                (-32002, format!("Aegis: POLICY_READ: {reason}"))
            }
            Self::NoPolicy => {
                trace!("NoPolicy");
                (-32001, "Aegis: NO_POLICY".to_string())
            }
            Self::KillSwitch => {
                trace!("KillSwitch");
                (-32001, "Aegis: KILL_SWITCH".to_string())
            }
            Self::LimitExceeded => {
                trace!("LimitExceeded");
                (-32001, "Aegis: LIMIT_EXCEEDED".to_string())
            }
            Self::ReserveFailed { reason } => {
                warn!(%reason, "ReserveFailed");
                (-32002, format!("Aegis: RESERVE_FAILED: {reason}"))
            }
            Self::ForwardFailed { reason } => {
                warn!(%reason, "ForwardFailed");
                (-32003, format!("Aegis: FORWARD_FAILED: {reason}"))
            }
            Self::AnchorSubmit { reason } => {
                error!(%reason, "AnchorSubmit");
                (-32099, format!("Aegis: ANCHOR_SUBMIT: {reason}"))
            }
            Self::AnchorRevert { reason } => {
                error!(%reason, "AnchorRevert");
                (-32099, format!("Aegis: ANCHOR_REVERT: {reason}"))
            }
            Self::MalformedQueueRecord { reason } => {
                warn!(%reason, "MalformedQueueRecord");
                (-32099, format!("Aegis: MALFORMED_QUEUE_RECORD: {reason}"))
            }
            Self::Fatal { reason } => {
                error!(%reason, "Fatal");
                (-32099, format!("Aegis: FATAL: {reason}"))
            }
            Self::Reservation(err) => {
                warn!(?err, "ReservationError");
                (-32002, format!("Aegis: RESERVE_FAILED: {err}"))
            }
            Self::Contract(err) => {
                warn!(?err, "policy contract error");
                (-32002, format!("Aegis: POLICY_READ: {err}"))
            }
            Self::Reqwest(err) => {
                warn!(?err, "upstream forward error");
                (-32003, format!("Aegis: FORWARD_FAILED: {err}"))
            }
            Self::Json(err) => {
                trace!(?err, "json error");
                (-32602, format!("Aegis: PARSE_FAILURE: {err}"))
            }
        };

        let data = Some(serde_json::json!({ "reason": message.clone() }));

        (
            code,
            JsonRpcResponseEnum::Error(JsonRpcErrorData {
                code,
                message: message.into(),
                data,
            }),
        )
    }

    #[inline]
    pub fn into_response_with_id(self, id: Option<Box<RawValue>>) -> Response {
        let (_, response_data) = self.as_response_parts();
        let id = id.unwrap_or_else(|| RawValue::from_string("null".to_string()).unwrap());
        let response = JsonRpcForwardedResponse::from_response_data(response_data, id);
        (StatusCode::OK, Json(response)).into_response()
    }
}

impl IntoResponse for AegisError {
    #[inline]
    fn into_response(self) -> Response {
        self.into_response_with_id(None)
    }
}
