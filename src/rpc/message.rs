//! JSON-RPC 2.0 frame shapes.
//!
//! The same shapes travel in both directions: a call carries `method` (and an
//! `id` when it expects a reply), a reply carries `id` plus exactly one of
//! `result` or `error`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::ClientError;

/// JSON-RPC protocol version marker.
pub const JSONRPC_VERSION: &str = "2.0";

/// The requested method is not registered.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// The params are invalid or name an unknown session.
pub const INVALID_PARAMS: i64 = -32602;

/// The handler failed while serving the call.
pub const INTERNAL_ERROR: i64 = -32603;

/// The `error` member of a failed reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcErrorObject {
    /// Build an error object without `data`.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

impl From<RpcErrorObject> for ClientError {
    fn from(err: RpcErrorObject) -> Self {
        Self::Protocol {
            code: err.code,
            message: err.message,
        }
    }
}

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A call that expects a reply carrying the same `id`.
    Request {
        /// Peer-chosen correlation id, echoed verbatim in the reply.
        id: Value,
        /// Method name.
        method: String,
        /// Method parameters; `Null` when absent.
        params: Value,
    },
    /// A call without an `id`; never answered.
    Notification {
        /// Method name.
        method: String,
        /// Method parameters; `Null` when absent.
        params: Value,
    },
    /// A reply to one of our outbound requests.
    Response {
        /// Correlation id of the original request.
        id: Value,
        /// Success payload or peer-reported error.
        outcome: std::result::Result<Value, RpcErrorObject>,
    },
}

impl Frame {
    /// Classify a decoded JSON value.
    ///
    /// Returns `None` for anything that is neither a call nor a reply, such
    /// as a non-object or an object with an `id` but no `result`/`error`.
    #[must_use]
    pub fn classify(value: Value) -> Option<Self> {
        let Value::Object(mut map) = value else {
            return None;
        };

        let id = map.remove("id").filter(|id| !id.is_null());

        if let Some(Value::String(method)) = map.remove("method") {
            let params = map.remove("params").unwrap_or(Value::Null);
            return Some(match id {
                Some(id) => Self::Request { id, method, params },
                None => Self::Notification { method, params },
            });
        }

        let id = id?;
        if let Some(error) = map.remove("error") {
            let error = serde_json::from_value::<RpcErrorObject>(error).unwrap_or_else(|err| {
                RpcErrorObject::new(INTERNAL_ERROR, format!("malformed error object: {err}"))
            });
            return Some(Self::Response {
                id,
                outcome: Err(error),
            });
        }
        map.remove("result").map(|result| Self::Response {
            id,
            outcome: Ok(result),
        })
    }

    /// Method name for calls; `None` for replies.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request { method, .. } | Self::Notification { method, .. } => Some(method),
            Self::Response { .. } => None,
        }
    }
}

/// Build an outbound request object.
#[must_use]
pub fn request(id: u64, method: &str, params: Value) -> Value {
    json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "method": method, "params": params })
}

/// Build an outbound notification object.
#[must_use]
pub fn notification(method: &str, params: Value) -> Value {
    json!({ "jsonrpc": JSONRPC_VERSION, "method": method, "params": params })
}

/// Build a success reply.
#[must_use]
pub fn success(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "result": result })
}

/// Build an error reply.
#[must_use]
pub fn failure(id: Value, error: &RpcErrorObject) -> Value {
    json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "error": error })
}

/// Numeric view of a reply id; accepts integers and integer strings.
#[must_use]
pub fn numeric_id(id: &Value) -> Option<u64> {
    match id {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
