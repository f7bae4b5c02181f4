//! Buffered target response bodies, parsed for inspection and re-encoded.
//!
//! A POST response from the target is either one JSON document or an SSE
//! stream of JSON-RPC messages. [`ResponsePayload`] gives uniform mutable
//! access to the messages and re-encodes in the framing it was read from.

use bytes::Bytes;
use serde_json::Value;

use super::sse::{SseEvent, encode_sse_events, is_event_stream, parse_sse_events};

/// A parsed response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePayload {
    /// `application/json` body
    Json(Value),
    /// `text/event-stream` body; `messages[i]` is `Some` when event `i`
    /// carried JSON
    EventStream {
        events: Vec<SseEvent>,
        messages: Vec<Option<Value>>,
    },
}

impl ResponsePayload {
    /// Parse a body by content type. Returns `None` when the body is not JSON
    /// or, for SSE, when no event carries JSON.
    pub fn parse(content_type: Option<&str>, body: &[u8]) -> Option<Self> {
        if content_type.is_some_and(is_event_stream) {
            let text = std::str::from_utf8(body).ok()?;
            let events = parse_sse_events(text);
            let messages: Vec<Option<Value>> = events
                .iter()
                .map(|e| serde_json::from_str(&e.data).ok())
                .collect();
            if messages.iter().all(Option::is_none) {
                return None;
            }
            return Some(Self::EventStream { events, messages });
        }

        serde_json::from_slice(body).ok().map(Self::Json)
    }

    /// Every JSON message in the body. A JSON array body yields its elements.
    pub fn messages(&self) -> Vec<&Value> {
        match self {
            Self::Json(Value::Array(items)) => items.iter().collect(),
            Self::Json(value) => vec![value],
            Self::EventStream { messages, .. } => messages.iter().flatten().collect(),
        }
    }

    /// Mutable access to every JSON message in the body.
    pub fn messages_mut(&mut self) -> Vec<&mut Value> {
        match self {
            Self::Json(Value::Array(items)) => items.iter_mut().collect(),
            Self::Json(value) => vec![value],
            Self::EventStream { messages, .. } => messages.iter_mut().flatten().collect(),
        }
    }

    /// Re-encode in the original framing.
    pub fn encode(&self) -> Bytes {
        match self {
            Self::Json(value) => Bytes::from(value.to_string()),
            Self::EventStream { events, messages } => {
                let rewritten: Vec<SseEvent> = events
                    .iter()
                    .zip(messages)
                    .map(|(event, message)| match message {
                        Some(value) => SseEvent {
                            data: value.to_string(),
                            ..event.clone()
                        },
                        None => event.clone(),
                    })
                    .collect();
                Bytes::from(encode_sse_events(&rewritten))
            }
        }
    }
}
