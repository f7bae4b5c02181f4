//! Error handling for ToolWarden.
//!
//! Every error the proxy synthesizes for an MCP client is a
//! [`ToolWardenError`], rendered as a JSON-RPC 2.0 error object by
//! [`ToolWardenError::to_jsonrpc_error`]. Policy denials and forwarding
//! failures use distinct codes so clients and dashboards can tell them apart.
//!
//! | Code   | Variant                    |
//! |--------|----------------------------|
//! | -32700 | `ParseError`               |
//! | -32600 | `InvalidRequest`           |
//! | -32602 | `InvalidParams`            |
//! | -32603 | `InternalError`            |
//! | -32000 | `UpstreamConnectionFailed` |
//! | -32001 | `UpstreamTimeout`          |
//! | -32002 | `UpstreamError`            |
//! | -32003 | `ToolDisabled`             |
//! | -32009 | `RateLimited`              |
//! | -32010 | `SanitizationBlocked`      |

pub mod jsonrpc;

use jsonrpc::{ErrorData, JsonRpcError};
use thiserror::Error;

/// All error types that can reach an MCP client through the proxy.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ToolWardenError {
    /// Body could not be parsed, yet may still carry a `tools/call` that a
    /// more lenient parser on the target would accept.
    #[error("Parse error: {details}")]
    ParseError {
        /// What made the body unreadable
        details: String,
    },

    /// Request is not acceptable as a JSON-RPC message (for example a batch
    /// that smuggles a `tools/call`, or a reused in-flight request id).
    #[error("Invalid Request: {details}")]
    InvalidRequest {
        /// Description of what makes the request invalid
        details: String,
    },

    /// A `tools/call` whose parameters do not name a tool.
    #[error("Invalid params: {details}")]
    InvalidParams {
        /// Description of the parameter problem
        details: String,
    },

    /// The tool has been disabled through the management API.
    #[error("Tool '{tool}' is disabled")]
    ToolDisabled {
        /// The tool that was called
        tool: String,
    },

    /// The tool's per-minute call budget is exhausted for the current window.
    #[error("Rate limit exceeded for tool '{tool}'")]
    RateLimited {
        /// The tool that was called
        tool: String,
        /// Seconds until the current window rolls over
        retry_after_secs: Option<u64>,
    },

    /// Tool-call arguments were classified as a prompt-injection attempt.
    #[error("Request for '{tool}' was blocked by content inspection")]
    SanitizationBlocked {
        /// The tool that was called
        tool: String,
    },

    /// Cannot connect to the target MCP server.
    #[error("Cannot connect to MCP server")]
    UpstreamConnectionFailed {
        /// The target URL that failed
        url: String,
        /// Reason for the connection failure
        reason: String,
    },

    /// Target MCP server did not respond in time.
    #[error("MCP server did not respond in time")]
    UpstreamTimeout {
        /// The target URL that timed out
        url: String,
        /// The timeout in seconds
        timeout_secs: u64,
    },

    /// Target answered with something other than a usable MCP response.
    #[error("MCP server error: {message}")]
    UpstreamError {
        /// HTTP status from the target, when there was one
        status: Option<u16>,
        /// Description of the failure
        message: String,
    },

    /// Internal server error.
    #[error("Internal error. Reference: {correlation_id}")]
    InternalError {
        /// Correlation ID for debugging
        correlation_id: String,
    },
}

impl ToolWardenError {
    /// Maps the error to its JSON-RPC 2.0 error code.
    pub fn to_jsonrpc_code(&self) -> i32 {
        match self {
            Self::ParseError { .. } => -32700,
            Self::InvalidRequest { .. } => -32600,
            Self::InvalidParams { .. } => -32602,
            Self::InternalError { .. } => -32603,
            Self::UpstreamConnectionFailed { .. } => -32000,
            Self::UpstreamTimeout { .. } => -32001,
            Self::UpstreamError { .. } => -32002,
            Self::ToolDisabled { .. } => -32003,
            Self::RateLimited { .. } => -32009,
            Self::SanitizationBlocked { .. } => -32010,
        }
    }

    /// Returns the error type name for metrics and logging.
    pub fn error_type_name(&self) -> &'static str {
        match self {
            Self::ParseError { .. } => "parse_error",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::InvalidParams { .. } => "invalid_params",
            Self::ToolDisabled { .. } => "tool_disabled",
            Self::RateLimited { .. } => "rate_limited",
            Self::SanitizationBlocked { .. } => "sanitization_blocked",
            Self::UpstreamConnectionFailed { .. } => "upstream_connection_failed",
            Self::UpstreamTimeout { .. } => "upstream_timeout",
            Self::UpstreamError { .. } => "upstream_error",
            Self::InternalError { .. } => "internal_error",
        }
    }

    /// Pipeline stage that produced the error, if any.
    pub fn stage(&self) -> Option<&'static str> {
        match self {
            Self::ToolDisabled { .. } => Some("enablement"),
            Self::RateLimited { .. } => Some("rate_limit"),
            Self::SanitizationBlocked { .. } => Some("sanitizer"),
            Self::UpstreamConnectionFailed { .. }
            | Self::UpstreamTimeout { .. }
            | Self::UpstreamError { .. } => Some("forwarder"),
            _ => None,
        }
    }

    /// The tool the error concerns, for policy denials.
    pub fn tool(&self) -> Option<&str> {
        match self {
            Self::ToolDisabled { tool }
            | Self::RateLimited { tool, .. }
            | Self::SanitizationBlocked { tool } => Some(tool),
            _ => None,
        }
    }

    /// Whether this error is a policy denial (as opposed to a transport failure).
    pub fn is_policy_denial(&self) -> bool {
        matches!(
            self,
            Self::ToolDisabled { .. } | Self::RateLimited { .. } | Self::SanitizationBlocked { .. }
        )
    }

    /// Whether this error means the target could not be reached or answered badly.
    pub fn is_forwarding_failure(&self) -> bool {
        matches!(
            self,
            Self::UpstreamConnectionFailed { .. }
                | Self::UpstreamTimeout { .. }
                | Self::UpstreamError { .. }
        )
    }

    /// Returns retry-after hint for retriable errors.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::RateLimited {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }

    /// Returns safe details for client consumption (no sensitive data).
    pub fn safe_details(&self) -> Option<serde_json::Value> {
        match self {
            Self::UpstreamError {
                status: Some(status),
                ..
            } => {
                // Don't expose the upstream message (may contain internal details)
                Some(serde_json::json!({ "upstream_status": status }))
            }
            Self::UpstreamTimeout { timeout_secs, .. } => {
                Some(serde_json::json!({ "timeout_secs": timeout_secs }))
            }
            _ => None,
        }
    }

    /// Converts the error to a JSON-RPC error object.
    pub fn to_jsonrpc_error(&self, correlation_id: &str) -> JsonRpcError {
        JsonRpcError {
            code: self.to_jsonrpc_code(),
            message: self.to_string(),
            data: Some(ErrorData {
                correlation_id: correlation_id.to_string(),
                stage: self.stage().map(str::to_string),
                tool: self.tool().map(str::to_string),
                details: self.safe_details(),
                error_type: self.error_type_name().to_string(),
                retry_after: self.retry_after(),
            }),
        }
    }
}
