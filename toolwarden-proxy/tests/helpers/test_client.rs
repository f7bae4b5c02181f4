//! JSON-RPC and management API client for integration tests.

#![allow(dead_code)]

use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;

/// Response from a JSON-RPC call.
#[derive(Debug, Clone)]
pub struct JsonRpcResponse {
    pub id: Value,
    pub result: Option<Value>,
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    /// The error code, panicking if the call succeeded.
    pub fn error_code(&self) -> i32 {
        self.error
            .as_ref()
            .unwrap_or_else(|| panic!("expected an error, got {:?}", self.result))
            .code
    }
}

#[derive(Debug, Clone)]
pub struct TestClient {
    base_url: String,
    client: Client,
    session_id: Option<String>,
}

impl TestClient {
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap(),
            session_id: None,
        }
    }

    /// Send the session id on every later MCP request.
    pub fn with_session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    /// POST a raw body to `/mcp`.
    pub async fn post_mcp(&self, body: &Value) -> reqwest::Response {
        let mut request = self
            .client
            .post(format!("{}/mcp", self.base_url))
            .header("Accept", "application/json, text/event-stream")
            .json(body);
        if let Some(ref session) = self.session_id {
            request = request.header("mcp-session-id", session);
        }
        request.send().await.expect("Failed to send request")
    }

    pub async fn jsonrpc(&self, method: &str, params: Value, id: i64) -> JsonRpcResponse {
        let request = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        let body: Value = self
            .post_mcp(&request)
            .await
            .json()
            .await
            .expect("Failed to parse response");

        JsonRpcResponse {
            id: body["id"].clone(),
            result: body.get("result").cloned(),
            error: body.get("error").map(|e| JsonRpcError {
                code: e["code"].as_i64().unwrap_or(0) as i32,
                message: e["message"].as_str().unwrap_or("").to_string(),
                data: e.get("data").cloned(),
            }),
        }
    }

    pub async fn call_tool(&self, name: &str, arguments: Value, id: i64) -> JsonRpcResponse {
        self.jsonrpc("tools/call", json!({"name": name, "arguments": arguments}), id)
            .await
    }

    pub async fn initialize(&self) -> reqwest::Response {
        self.post_mcp(&json!({
            "jsonrpc": "2.0",
            "id": 0,
            "method": "initialize",
            "params": {
                "protocolVersion": "2025-03-26",
                "capabilities": {},
                "clientInfo": {"name": "test-client", "version": "0.1.0"}
            }
        }))
        .await
    }

    pub async fn delete_session(&self) -> reqwest::Response {
        let mut request = self.client.delete(format!("{}/mcp", self.base_url));
        if let Some(ref session) = self.session_id {
            request = request.header("mcp-session-id", session);
        }
        request.send().await.expect("Failed to send DELETE")
    }

    pub async fn api_get(&self, path: &str) -> Value {
        self.client
            .get(format!("{}{path}", self.base_url))
            .send()
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse response")
    }

    pub async fn api_post(&self, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(format!("{}{path}", self.base_url))
            .json(&body)
            .send()
            .await
            .expect("Failed to send request")
    }

    /// `/api/stats` counters for one tool.
    pub async fn tool_stats(&self, tool: &str) -> Value {
        self.api_get("/api/stats").await["tools"][tool].clone()
    }
}
