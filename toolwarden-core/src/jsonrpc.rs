//! JSON-RPC 2.0 primitives: ids, responses and structural classification.
//!
//! Classification works on an already-parsed `serde_json::Value` and only
//! looks at `jsonrpc`, `id` and `method`. MCP-level meaning (handshake,
//! tool call, ...) is layered on top by [`crate::interceptor`].

use std::borrow::Cow;
use std::fmt;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

use crate::error::jsonrpc::JsonRpcError;

/// JSON-RPC protocol version string.
pub const JSONRPC_VERSION: &str = "2.0";

// ============================================================================
// Fast Correlation ID Generator
// ============================================================================

/// Process-unique upper 64 bits, drawn once at startup.
static CORRELATION_PREFIX: LazyLock<u64> = LazyLock::new(|| {
    let seed = Uuid::new_v4().as_u128();
    (seed >> 64) as u64
});

static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a correlation ID without hitting the CSPRNG on every request.
///
/// The result has correct v4 version and RFC 4122 variant bits set.
pub fn fast_correlation_id() -> Uuid {
    let prefix = *CORRELATION_PREFIX;
    let counter = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut combined = ((prefix as u128) << 64) | (counter as u128);
    combined = (combined & !(0xF_u128 << 76)) | (0x4_u128 << 76);
    combined = (combined & !(0x3_u128 << 62)) | (0x2_u128 << 62);
    Uuid::from_u128(combined)
}

// ============================================================================
// Ids and responses
// ============================================================================

/// JSON-RPC request ID.
///
/// The original type (string or integer) must be echoed back unchanged, so
/// the id is kept as-is rather than normalised to a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JsonRpcId {
    /// Integer ID (e.g., `"id": 1`)
    Number(i64),
    /// String ID (e.g., `"id": "abc-123"`)
    String(String),
    /// Explicit null ID
    Null,
}

impl JsonRpcId {
    /// Parse an id from a JSON value. Floats, booleans, arrays and objects are rejected.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(JsonRpcId::Number),
            Value::String(s) => Some(JsonRpcId::String(s.clone())),
            Value::Null => Some(JsonRpcId::Null),
            _ => None,
        }
    }

    /// Convert back to a JSON value.
    pub fn to_value(&self) -> Value {
        match self {
            JsonRpcId::Number(n) => Value::from(*n),
            JsonRpcId::String(s) => Value::String(s.clone()),
            JsonRpcId::Null => Value::Null,
        }
    }
}

impl fmt::Display for JsonRpcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsonRpcId::Number(n) => write!(f, "{n}"),
            JsonRpcId::String(s) => write!(f, "\"{s}\""),
            JsonRpcId::Null => f.write_str("null"),
        }
    }
}

impl Serialize for JsonRpcId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            JsonRpcId::Number(n) => serializer.serialize_i64(*n),
            JsonRpcId::String(s) => serializer.serialize_str(s),
            JsonRpcId::Null => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for JsonRpcId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        JsonRpcId::from_value(&value).ok_or_else(|| {
            serde::de::Error::custom("JSON-RPC ID must be string, integer, or null")
        })
    }
}

/// JSON-RPC 2.0 response synthesized by the proxy.
///
/// The `id` field always serializes: `None` becomes `"id": null`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always "2.0"
    pub jsonrpc: Cow<'static, str>,
    /// Request ID
    pub id: Option<JsonRpcId>,
    /// Result (mutually exclusive with error)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error (mutually exclusive with result)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Create a success response.
    pub fn success(id: Option<JsonRpcId>, result: Value) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: Option<JsonRpcId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            id,
            result: None,
            error: Some(error),
        }
    }
}

// ============================================================================
// Structural classification
// ============================================================================

/// Structural kind of a single JSON-RPC message.
///
/// - Request: has both `id` and `method`
/// - Response: has `id` but no `method`
/// - Notification: has `method` but no `id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonRpcMessageKind {
    /// Has both `id` and `method`.
    Request { id: JsonRpcId, method: String },
    /// Has `id` but no `method`.
    Response { id: JsonRpcId },
    /// Has `method` but no `id`.
    Notification { method: String },
}

/// Errors that can occur during JSON-RPC message classification.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum JsonRpcClassifyError {
    /// The `jsonrpc` field is missing or not `"2.0"`.
    #[error("missing or invalid jsonrpc version field")]
    InvalidVersion,
    /// The `id` field is present but not a valid JSON-RPC ID.
    #[error("invalid id field")]
    InvalidId,
    /// The message has neither `id` nor `method`.
    #[error("message has neither id nor method")]
    Unclassifiable,
}

/// Classify a parsed JSON-RPC value without taking ownership.
pub fn classify_jsonrpc(value: &Value) -> Result<JsonRpcMessageKind, JsonRpcClassifyError> {
    let version = value.get("jsonrpc").and_then(|v| v.as_str());
    if version != Some(JSONRPC_VERSION) {
        return Err(JsonRpcClassifyError::InvalidVersion);
    }

    let id = match value.get("id") {
        Some(raw) => Some(JsonRpcId::from_value(raw).ok_or(JsonRpcClassifyError::InvalidId)?),
        None => None,
    };
    let method = value
        .get("method")
        .and_then(|v| v.as_str())
        .map(String::from);

    match (id, method) {
        (Some(id), Some(method)) => Ok(JsonRpcMessageKind::Request { id, method }),
        (Some(id), None) => Ok(JsonRpcMessageKind::Response { id }),
        (None, Some(method)) => Ok(JsonRpcMessageKind::Notification { method }),
        (None, None) => Err(JsonRpcClassifyError::Unclassifiable),
    }
}

/// Whether a value looks like a JSON-RPC 2.0 message (or a non-empty batch of them).
pub fn is_jsonrpc_message(value: &Value) -> bool {
    match value {
        Value::Array(items) => {
            !items.is_empty() && items.iter().all(|v| classify_jsonrpc(v).is_ok())
        }
        other => classify_jsonrpc(other).is_ok(),
    }
}
