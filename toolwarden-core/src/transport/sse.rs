//! Server-Sent Events framing for the MCP Streamable HTTP transport.
//!
//! Targets answer POSTs either with a single JSON body or with a
//! `text/event-stream` body whose `data:` fields carry JSON-RPC messages.
//! Parsing keeps `id`, `event` and `retry` so a rewritten stream keeps the
//! target's framing.

use std::fmt::Write as _;

/// Content type of an SSE response body.
pub const EVENT_STREAM: &str = "text/event-stream";

/// A single parsed SSE event.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// The `id:` field, if present
    pub id: Option<String>,
    /// The `event:` field, if present (MCP targets use `message`)
    pub event: Option<String>,
    /// The `retry:` field, if present and numeric
    pub retry: Option<u64>,
    /// All `data:` lines joined with `\n`
    pub data: String,
}

/// Whether a `Content-Type` header value denotes an SSE stream.
pub fn is_event_stream(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .is_some_and(|media| media.trim().eq_ignore_ascii_case(EVENT_STREAM))
}

/// Parse a complete SSE body into events.
///
/// Accepts `\n`, `\r\n` and `\r` line endings. Comment lines (leading `:`)
/// are skipped. Events with neither data nor metadata are dropped.
pub fn parse_sse_events(body: &str) -> Vec<SseEvent> {
    let normalized = body.replace("\r\n", "\n").replace('\r', "\n");
    let mut events = Vec::new();

    for raw_event in normalized.split("\n\n") {
        if raw_event.trim().is_empty() {
            continue;
        }

        let mut event = SseEvent::default();
        let mut has_field = false;
        let mut has_data = false;

        for line in raw_event.lines() {
            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.find(':') {
                Some(colon) => {
                    let value = &line[colon + 1..];
                    (&line[..colon], value.strip_prefix(' ').unwrap_or(value))
                }
                None => (line, ""),
            };

            match field {
                "id" => {
                    event.id = Some(value.to_string());
                    has_field = true;
                }
                "event" => {
                    event.event = Some(value.to_string());
                    has_field = true;
                }
                "retry" => {
                    if let Ok(ms) = value.trim().parse() {
                        event.retry = Some(ms);
                        has_field = true;
                    }
                }
                "data" => {
                    if has_data {
                        event.data.push('\n');
                    }
                    event.data.push_str(value);
                    has_data = true;
                    has_field = true;
                }
                _ => {}
            }
        }

        if has_field {
            events.push(event);
        }
    }

    events
}

/// Encode events back into an SSE body.
pub fn encode_sse_events(events: &[SseEvent]) -> String {
    let mut out = String::new();
    for event in events {
        if let Some(ref event_type) = event.event {
            let _ = writeln!(out, "event: {event_type}");
        }
        if let Some(ref id) = event.id {
            let _ = writeln!(out, "id: {id}");
        }
        if let Some(retry) = event.retry {
            let _ = writeln!(out, "retry: {retry}");
        }
        if !event.data.is_empty() || event.event.is_some() {
            for line in event.data.split('\n') {
                let _ = writeln!(out, "data: {line}");
            }
        }
        out.push('\n');
    }
    out
}
