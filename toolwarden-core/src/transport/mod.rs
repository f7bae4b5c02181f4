//! Wire plumbing between the proxy and the target MCP server.
//!
//! - [`upstream`]: pooled HTTP client, request relay and header hygiene
//! - [`sse`]: `text/event-stream` framing
//! - [`payload`]: buffered response bodies in either framing

pub mod payload;
pub mod sse;
pub mod upstream;

pub use payload::ResponsePayload;
pub use sse::{EVENT_STREAM, SseEvent};
pub use upstream::{
    BufferedResponse, ByteStream, ForwardRequest, StreamingResponse, UpstreamClient,
    UpstreamConfig, UpstreamForwarder,
};
