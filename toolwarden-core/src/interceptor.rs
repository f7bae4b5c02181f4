//! MCP message classification.
//!
//! Every POST body a client sends is classified before anything reaches the
//! target. Only `tools/call` requests are subject to policy; everything the
//! interceptor does not recognise is [`McpMessage::Other`] and is relayed
//! byte-for-byte. Parsing fails open, policy fails closed: a message that
//! names `tools/call` but cannot be screened is rejected rather than relayed.
//! This includes bodies serde_json refuses but a lenient target parser
//! might accept (a leading BOM is stripped first).

use serde_json::Value;

use crate::error::ToolWardenError;
use crate::jsonrpc::{JsonRpcId, JsonRpcMessageKind, classify_jsonrpc};

/// MCP lifecycle handshake method.
pub const METHOD_INITIALIZE: &str = "initialize";
/// Tool enumeration method.
pub const METHOD_TOOLS_LIST: &str = "tools/list";
/// Tool invocation method.
pub const METHOD_TOOLS_CALL: &str = "tools/call";

/// A tool invocation extracted from a `tools/call` request.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    /// Request id, `None` when the client sent the call as a notification
    pub id: Option<JsonRpcId>,
    /// Tool name from `params.name`
    pub name: String,
    /// Full `params.arguments` value (empty object when absent)
    pub arguments: Value,
    /// Transport session the call arrived on
    pub session_id: Option<String>,
}

impl ToolCall {
    /// Flattened text of the arguments, as handed to the sanitizer.
    pub fn argument_text(&self) -> String {
        collect_text(&self.arguments)
    }
}

/// Payload of a response to an in-flight tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCallOutcome {
    /// `result` member of the response
    Result(Value),
    /// `error` member of the response
    Error(Value),
}

/// A response from the target that answers an in-flight tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallResponse {
    /// Id of the call being answered
    pub id: JsonRpcId,
    /// Transport session of the call
    pub session_id: Option<String>,
    /// Result or error
    pub outcome: ToolCallOutcome,
}

/// Classification of a single MCP message.
#[derive(Debug, Clone, PartialEq)]
pub enum McpMessage {
    /// `initialize`
    Handshake { id: Option<JsonRpcId> },
    /// `tools/list`
    ListTools { id: Option<JsonRpcId> },
    /// `tools/call`
    ToolCallRequest(ToolCall),
    /// Response whose id is an in-flight tool call
    ToolCallResponse(ToolCallResponse),
    /// Anything else, relayed untouched
    Other,
}

/// Classify a client request body.
///
/// # Errors
///
/// - `ParseError` for a body that is not valid JSON but may still carry a
///   `tools/call`.
/// - `InvalidRequest` for a batch containing a `tools/call`, or a `tools/call`
///   that is not a structurally valid JSON-RPC message.
/// - `InvalidParams` for a `tools/call` without a string `params.name`.
pub fn classify_request(
    body: &[u8],
    session_id: Option<&str>,
) -> Result<McpMessage, ToolWardenError> {
    let body = strip_bom(body);
    let value: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(e) if may_carry_tool_call(body) => {
            return Err(ToolWardenError::ParseError {
                details: format!("body could not be screened: {e}"),
            });
        }
        Err(_) => return Ok(McpMessage::Other),
    };
    classify_request_value(&value, session_id)
}

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// The body without a leading UTF-8 byte-order mark.
pub fn strip_bom(body: &[u8]) -> &[u8] {
    body.strip_prefix(UTF8_BOM).unwrap_or(body)
}

/// Whether an unparseable body could still be read as a `tools/call` by a
/// more lenient JSON parser.
///
/// Covers non-UTF-8 and UTF-16/32 encodings (NUL bytes), `\u` escapes that
/// could spell the method name, and the method name itself (behind `NaN`
/// literals, excessive nesting, trailing garbage and the like).
fn may_carry_tool_call(body: &[u8]) -> bool {
    let Ok(text) = std::str::from_utf8(body) else {
        return true;
    };
    text.contains('\0')
        || text.contains("\\u")
        || text.contains(METHOD_TOOLS_CALL)
        || text.contains("tools\\/call")
}

/// Classify an already-parsed client request.
pub fn classify_request_value(
    value: &Value,
    session_id: Option<&str>,
) -> Result<McpMessage, ToolWardenError> {
    if let Value::Array(items) = value {
        if items.iter().any(names_tool_call) {
            return Err(ToolWardenError::InvalidRequest {
                details: "tools/call is not accepted inside a JSON-RPC batch".to_string(),
            });
        }
        return Ok(McpMessage::Other);
    }

    let (id, method) = match classify_jsonrpc(value) {
        Ok(JsonRpcMessageKind::Request { id, method }) => (Some(id), method),
        Ok(JsonRpcMessageKind::Notification { method }) => (None, method),
        Ok(JsonRpcMessageKind::Response { .. }) => return Ok(McpMessage::Other),
        Err(e) if names_tool_call(value) => {
            return Err(ToolWardenError::InvalidRequest {
                details: format!("malformed tools/call message: {e}"),
            });
        }
        Err(_) => return Ok(McpMessage::Other),
    };

    match method.as_str() {
        METHOD_INITIALIZE => Ok(McpMessage::Handshake { id }),
        METHOD_TOOLS_LIST => Ok(McpMessage::ListTools { id }),
        METHOD_TOOLS_CALL => {
            let params = value.get("params");
            let name = params
                .and_then(|p| p.get("name"))
                .and_then(Value::as_str)
                .filter(|n| !n.is_empty())
                .ok_or_else(|| ToolWardenError::InvalidParams {
                    details: "tools/call requires a non-empty string params.name".to_string(),
                })?;
            let arguments = params
                .and_then(|p| p.get("arguments"))
                .cloned()
                .unwrap_or_else(|| Value::Object(Default::default()));

            Ok(McpMessage::ToolCallRequest(ToolCall {
                id,
                name: name.to_string(),
                arguments,
                session_id: session_id.map(str::to_string),
            }))
        }
        _ => Ok(McpMessage::Other),
    }
}

/// Classify a message received from the target.
///
/// A response is a [`McpMessage::ToolCallResponse`] only when `in_flight`
/// reports its id as an outstanding tool call for this session.
pub fn classify_response(
    value: &Value,
    session_id: Option<&str>,
    in_flight: impl Fn(&JsonRpcId) -> bool,
) -> McpMessage {
    let Ok(JsonRpcMessageKind::Response { id }) = classify_jsonrpc(value) else {
        return McpMessage::Other;
    };
    if !in_flight(&id) {
        return McpMessage::Other;
    }

    let outcome = if let Some(result) = value.get("result") {
        ToolCallOutcome::Result(result.clone())
    } else if let Some(error) = value.get("error") {
        ToolCallOutcome::Error(error.clone())
    } else {
        return McpMessage::Other;
    };

    McpMessage::ToolCallResponse(ToolCallResponse {
        id,
        session_id: session_id.map(str::to_string),
        outcome,
    })
}

fn names_tool_call(value: &Value) -> bool {
    value.get("method").and_then(Value::as_str) == Some(METHOD_TOOLS_CALL)
}

/// Flatten every string in a JSON value (object keys included) into one
/// newline-separated text.
pub fn collect_text(value: &Value) -> String {
    let mut out = String::new();
    push_text(value, &mut out);
    out
}

fn push_text(value: &Value, out: &mut String) {
    match value {
        Value::String(s) => push_line(out, s),
        Value::Array(items) => items.iter().for_each(|v| push_text(v, out)),
        Value::Object(map) => {
            for (key, v) in map {
                push_line(out, key);
                push_text(v, out);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

fn push_line(out: &mut String, s: &str) {
    if s.is_empty() {
        return;
    }
    if !out.is_empty() {
        out.push('\n');
    }
    out.push_str(s);
}
