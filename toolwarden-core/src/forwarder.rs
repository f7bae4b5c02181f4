//! Relays client traffic to the target and screens what comes back.
//!
//! Tool-call and tool-list responses are buffered so they can be inspected
//! and rewritten in their original framing. Everything else is streamed
//! through untouched.

use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, StatusCode};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::ToolWardenError;
use crate::interceptor::{McpMessage, ToolCall, ToolCallOutcome, classify_response, collect_text};
use crate::jsonrpc::is_jsonrpc_message;
use crate::policy::PolicyEngine;
use crate::registry::CallOutcome;
use crate::sanitizer::{Direction, redacted_result};
use crate::session::{SESSION_HEADER, SessionTracker};
use crate::transport::payload::ResponsePayload;
use crate::transport::upstream::{
    BufferedResponse, ForwardRequest, StreamingResponse, UpstreamForwarder,
    classify_upstream_status,
};

/// Forwarding half of the pipeline.
pub struct Forwarder {
    upstream: Arc<dyn UpstreamForwarder>,
    policy: Arc<PolicyEngine>,
    sessions: Arc<SessionTracker>,
}

impl Forwarder {
    pub fn new(
        upstream: Arc<dyn UpstreamForwarder>,
        policy: Arc<PolicyEngine>,
        sessions: Arc<SessionTracker>,
    ) -> Self {
        Self {
            upstream,
            policy,
            sessions,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionTracker> {
        &self.sessions
    }

    pub fn policy(&self) -> &Arc<PolicyEngine> {
        &self.policy
    }

    /// Remove a proxy-minted session id from an outbound request. The target
    /// only ever sees ids it issued itself.
    pub fn prepare(&self, request: &mut ForwardRequest) {
        let Some(id) = session_id(&request.headers) else {
            return;
        };
        self.sessions.touch(&id);
        if !self.sessions.is_upstream_issued(&id) {
            request.headers.remove(SESSION_HEADER);
        }
    }

    /// Relay an admitted tool call and screen its result.
    ///
    /// Records `forwarding-failure` when the target cannot produce a usable
    /// answer, and `redacted` when the result is replaced.
    pub async fn relay_tool_call(
        &self,
        call: &ToolCall,
        request: &ForwardRequest,
    ) -> Result<BufferedResponse, ToolWardenError> {
        match self.forward_tool_call(call, request).await {
            Ok(response) => Ok(response),
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Forwarding tool call failed");
                self.policy
                    .record_outcome(&call.name, CallOutcome::ForwardingFailure);
                Err(e)
            }
        }
    }

    async fn forward_tool_call(
        &self,
        call: &ToolCall,
        request: &ForwardRequest,
    ) -> Result<BufferedResponse, ToolWardenError> {
        let mut response = self.upstream.forward(request).await?;

        // Notifications have no answer to check.
        let Some(ref call_id) = call.id else {
            return Ok(response);
        };

        let payload = ResponsePayload::parse(response.content_type(), &response.body);
        let carries_jsonrpc = payload
            .as_ref()
            .is_some_and(|p| p.messages().into_iter().any(is_jsonrpc_message));

        if !response.status.is_success() {
            // A JSON-RPC error body is a protocol answer; relay it as is.
            if carries_jsonrpc {
                return Ok(response);
            }
            return Err(classify_upstream_status(response.status));
        }
        let Some(mut payload) = payload.filter(|_| carries_jsonrpc) else {
            return Err(ToolWardenError::UpstreamError {
                status: Some(response.status.as_u16()),
                message: "target returned a body that is not JSON-RPC".to_string(),
            });
        };

        let session = call.session_id.as_deref();
        let is_ours = |id: &crate::jsonrpc::JsonRpcId| {
            id == call_id || self.sessions.is_in_flight(session, id)
        };

        let mut redacted = false;
        for message in payload.messages_mut() {
            let McpMessage::ToolCallResponse(answer) = classify_response(message, session, is_ours)
            else {
                continue;
            };
            let ToolCallOutcome::Result(result) = answer.outcome else {
                continue;
            };

            let verdict = self
                .policy
                .sanitizer()
                .inspect(Direction::Response, &collect_text(&result))
                .await;
            if verdict.is_suspicious() {
                warn!(
                    tool = %call.name,
                    request_id = %answer.id,
                    source = verdict.source.as_str(),
                    score = verdict.score,
                    matched = verdict.matched.as_deref().unwrap_or(""),
                    "Tool result redacted"
                );
                if let Value::Object(map) = message {
                    map.insert("result".to_string(), redacted_result());
                }
                self.policy.record_outcome(&call.name, CallOutcome::Redacted);
                redacted = true;
            }
        }

        if redacted {
            response.body = payload.encode();
        }
        Ok(response)
    }

    /// Relay a `tools/list` request, registering every listed tool and
    /// hiding the disabled ones.
    ///
    /// A response that cannot be parsed is relayed unchanged.
    pub async fn relay_tool_list(
        &self,
        request: &ForwardRequest,
    ) -> Result<BufferedResponse, ToolWardenError> {
        let mut response = self.upstream.forward(request).await?;
        if !response.status.is_success() {
            return Ok(response);
        }
        let Some(mut payload) = ResponsePayload::parse(response.content_type(), &response.body)
        else {
            debug!("tools/list response is not JSON, relaying unchanged");
            return Ok(response);
        };

        let registry = self.policy.registry();
        let mut hidden = 0usize;
        for message in payload.messages_mut() {
            let Some(tools) = message
                .get_mut("result")
                .and_then(|r| r.get_mut("tools"))
                .and_then(Value::as_array_mut)
            else {
                continue;
            };

            for tool in tools.iter() {
                if let Some(name) = tool.get("name").and_then(Value::as_str) {
                    let description = tool.get("description").and_then(Value::as_str);
                    registry.discover(name, description);
                }
            }

            let before = tools.len();
            tools.retain(|tool| {
                tool.get("name")
                    .and_then(Value::as_str)
                    .and_then(|name| registry.lookup(name))
                    .is_none_or(|t| t.enabled)
            });
            hidden += before - tools.len();
        }

        if hidden > 0 {
            info!(hidden, "Disabled tools removed from tools/list");
            response.body = payload.encode();
        }
        Ok(response)
    }

    /// Relay an `initialize` request and open the session it establishes.
    ///
    /// When the target issues no session id the proxy mints one and adds it
    /// to the response.
    pub async fn relay_handshake(
        &self,
        request: &ForwardRequest,
    ) -> Result<StreamingResponse, ToolWardenError> {
        let mut response = self.upstream.stream(request).await?;
        if !response.status.is_success() {
            return Ok(response);
        }

        match session_id(&response.headers) {
            Some(id) => {
                self.sessions.open(&id, true);
                info!(session_id = %id, "Session opened by target");
            }
            None => {
                let id = self.sessions.mint();
                match HeaderValue::from_str(&id) {
                    Ok(value) => {
                        response.headers.insert(SESSION_HEADER, value);
                    }
                    Err(e) => warn!(error = %e, "Minted session id is not a valid header"),
                }
                info!(session_id = %id, "Session opened by proxy");
            }
        }
        Ok(response)
    }

    /// Close the session named by a `DELETE` request.
    ///
    /// The request is relayed only when the target issued the id; for a
    /// proxy-minted id the session is closed locally and `None` is returned.
    pub async fn close_session(
        &self,
        request: &ForwardRequest,
    ) -> Result<Option<StreamingResponse>, ToolWardenError> {
        let Some(id) = session_id(&request.headers) else {
            return self.upstream.stream(request).await.map(Some);
        };

        let upstream_issued = self.sessions.is_upstream_issued(&id);
        self.sessions.close(&id);
        info!(session_id = %id, upstream_issued, "Session closed by client");

        if upstream_issued {
            self.upstream.stream(request).await.map(Some)
        } else {
            Ok(None)
        }
    }

    /// Relay any other request byte-for-byte.
    pub async fn relay_stream(
        &self,
        request: &ForwardRequest,
    ) -> Result<StreamingResponse, ToolWardenError> {
        self.upstream.stream(request).await
    }

    /// Relay a request and buffer the response.
    pub async fn relay_buffered(
        &self,
        request: &ForwardRequest,
    ) -> Result<BufferedResponse, ToolWardenError> {
        self.upstream.forward(request).await
    }
}

/// The session id header of a request or response.
pub fn session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// A buffered response carrying `body` as JSON with status 200.
pub fn json_response(body: impl Into<Bytes>) -> BufferedResponse {
    let mut headers = HeaderMap::new();
    headers.insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    BufferedResponse {
        status: StatusCode::OK,
        headers,
        body: body.into(),
    }
}
