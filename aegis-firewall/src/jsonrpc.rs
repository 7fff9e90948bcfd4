//! JSON-RPC 2.0 request/response types, including the batch form.
//!
//! A request is either a single object or an array of them. Responses split
//! `JsonRpcErrorData` from the forwarded result type so "we produced this
//! error" and "upstream returned this shape verbatim" stay distinct.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

fn default_jsonrpc_version() -> String {
    "2.0".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JsonRpcRequest {
    #[serde(default = "default_jsonrpc_version")]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Box<RawValue>>,
    /// No `method` at all is itself a malformed request, so this defaults
    /// to empty rather than failing deserialization outright — that would
    /// surface as a bare HTTP 400 instead of the JSON-RPC `-32600` envelope
    /// the caller expects.
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// A client may send one request object or a batch (array) of them.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum JsonRpcRequestEnum {
    Single(JsonRpcRequest),
    Batch(Vec<JsonRpcRequest>),
}

impl JsonRpcRequestEnum {
    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Batch(batch) => batch.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcErrorData {
    pub code: i64,
    pub message: std::borrow::Cow<'static, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Either the raw value the upstream handed back, or an error we (or it)
/// produced. Kept separate from `JsonRpcForwardedResponse` so call sites
/// that only have one half (just an error, or just a result) aren't forced
/// to invent the other.
#[derive(Debug, Clone)]
pub enum JsonRpcResponseEnum {
    Result(Box<RawValue>),
    Error(JsonRpcErrorData),
}

impl From<JsonRpcErrorData> for JsonRpcResponseEnum {
    fn from(err: JsonRpcErrorData) -> Self {
        Self::Error(err)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcForwardedResponse {
    #[serde(default = "default_jsonrpc_version_cow")]
    pub jsonrpc: std::borrow::Cow<'static, str>,
    pub id: Box<RawValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Box<RawValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorData>,
}

fn default_jsonrpc_version_cow() -> std::borrow::Cow<'static, str> {
    std::borrow::Cow::Borrowed("2.0")
}

impl JsonRpcForwardedResponse {
    pub fn from_response_data(data: JsonRpcResponseEnum, id: Box<RawValue>) -> Self {
        match data {
            JsonRpcResponseEnum::Result(result) => Self {
                jsonrpc: default_jsonrpc_version_cow(),
                id,
                result: Some(result),
                error: None,
            },
            JsonRpcResponseEnum::Error(error) => Self {
                jsonrpc: default_jsonrpc_version_cow(),
                id,
                result: None,
                error: Some(error),
            },
        }
    }
}

/// One item's worth of response: either the upstream's bytes passed through
/// untouched (field order, extra top-level keys, `error.data` and all), or a
/// response object this firewall constructed itself (our own application
/// error, or one of the small number of cases where we must synthesize a
/// reply). Serializing `Verbatim` just re-emits the `RawValue`'s original
/// text, so a forwarded response stays byte-equivalent to what upstream sent.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum JsonRpcHandledResponse {
    Verbatim(Box<RawValue>),
    Generated(JsonRpcForwardedResponse),
}

/// A client may receive one response object or a batch, mirroring the shape
/// of the request that produced it.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum JsonRpcForwardedResponseEnum {
    Single(JsonRpcHandledResponse),
    Batch(Vec<JsonRpcHandledResponse>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_request_parses() {
        let raw = r#"{"jsonrpc":"2.0","id":1,"method":"eth_chainId","params":[]}"#;
        let parsed: JsonRpcRequestEnum = serde_json::from_str(raw).unwrap();
        match parsed {
            JsonRpcRequestEnum::Single(req) => assert_eq!(req.method, "eth_chainId"),
            JsonRpcRequestEnum::Batch(_) => panic!("expected single"),
        }
    }

    #[test]
    fn batch_request_parses_and_preserves_order() {
        let raw = r#"[
            {"jsonrpc":"2.0","id":1,"method":"eth_chainId","params":[]},
            {"jsonrpc":"2.0","id":2,"method":"eth_blockNumber","params":[]}
        ]"#;
        let parsed: JsonRpcRequestEnum = serde_json::from_str(raw).unwrap();
        match parsed {
            JsonRpcRequestEnum::Batch(batch) => {
                assert_eq!(batch.len(), 2);
                assert_eq!(batch[0].method, "eth_chainId");
                assert_eq!(batch[1].method, "eth_blockNumber");
            }
            JsonRpcRequestEnum::Single(_) => panic!("expected batch"),
        }
    }

    #[test]
    fn missing_jsonrpc_field_defaults_to_2_0() {
        let raw = r#"{"id":1,"method":"eth_chainId","params":[]}"#;
        let parsed: JsonRpcRequestEnum = serde_json::from_str(raw).unwrap();
        match parsed {
            JsonRpcRequestEnum::Single(req) => assert_eq!(req.jsonrpc, "2.0"),
            JsonRpcRequestEnum::Batch(_) => panic!("expected single"),
        }
    }
}
