//! Wiremock stand-in for the demonstration weather MCP server.

#![allow(dead_code)]

use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const TARGET_SESSION: &str = "target-session-1";

/// Answers a JSON-RPC request with a fixed `result`, echoing its id.
pub struct JsonRpcResult {
    result: Value,
    sse: bool,
}

impl JsonRpcResult {
    pub fn json(result: Value) -> Self {
        Self { result, sse: false }
    }

    pub fn sse(result: Value) -> Self {
        Self { result, sse: true }
    }
}

impl Respond for JsonRpcResult {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let id = serde_json::from_slice::<Value>(&request.body)
            .ok()
            .and_then(|v| v.get("id").cloned())
            .unwrap_or(Value::Null);
        let body = json!({"jsonrpc": "2.0", "id": id, "result": self.result});
        if self.sse {
            ResponseTemplate::new(200).set_body_raw(
                format!("event: message\ndata: {body}\n\n"),
                "text/event-stream",
            )
        } else {
            ResponseTemplate::new(200).set_body_json(body)
        }
    }
}

/// A tool result holding one text block.
pub fn text_result(text: &str) -> Value {
    json!({"content": [{"type": "text", "text": text}], "isError": false})
}

/// Start a target that answers `tools/call` for `tool` with `text`.
///
/// The mock expects exactly `expected_calls` forwarded calls; the
/// expectation is verified when the server is dropped.
pub async fn weather_target(tool: &str, text: &str, expected_calls: u64) -> MockServer {
    let server = MockServer::start().await;
    mount_tool(&server, tool, text, expected_calls).await;
    server
}

pub async fn mount_tool(server: &MockServer, tool: &str, text: &str, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(body_partial_json(
            json!({"method": "tools/call", "params": {"name": tool}}),
        ))
        .respond_with(JsonRpcResult::json(text_result(text)))
        .expect(expected_calls)
        .mount(server)
        .await;
}

/// Answer `initialize`, optionally issuing a session id.
pub async fn mount_initialize(server: &MockServer, issue_session: bool) {
    let body_matcher = body_partial_json(json!({"method": "initialize"}));
    let respond = move |request: &Request| {
        let mut template = JsonRpcResult::json(json!({
            "protocolVersion": "2025-03-26",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "weather", "version": "1.0.0"}
        }))
        .respond(request);
        if issue_session {
            template = template.insert_header("mcp-session-id", TARGET_SESSION);
        }
        template
    };
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(body_matcher)
        .respond_with(respond)
        .mount(server)
        .await;
}

/// Answer `tools/list` over SSE with the two weather tools.
pub async fn mount_tool_list(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(body_partial_json(json!({"method": "tools/list"})))
        .respond_with(JsonRpcResult::sse(json!({"tools": [
            {"name": "get_alerts", "description": "Get weather alerts for a US state."},
            {"name": "get_forecast", "description": "Get weather forecast for a location."}
        ]})))
        .mount(server)
        .await;
}
