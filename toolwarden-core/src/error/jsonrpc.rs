//! JSON-RPC 2.0 error objects returned to MCP clients.

use serde::{Deserialize, Serialize};

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code (standard JSON-RPC or ToolWarden-specific)
    pub code: i32,

    /// Human-readable error message
    pub message: String,

    /// Additional error data (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ErrorData>,
}

/// Structured context attached to every error the proxy synthesizes.
///
/// All fields are safe for client consumption. Sanitizer scores, matched
/// patterns and upstream URLs are never included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ErrorData {
    /// Identifier for locating this error in the proxy logs
    pub correlation_id: String,

    /// Pipeline stage that produced the error: "enablement", "rate_limit",
    /// "sanitizer" or "forwarder"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,

    /// Tool that was being called
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,

    /// Type-specific details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Machine-readable error type name (matches metrics and logs)
    pub error_type: String,

    /// Suggested retry delay in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}
