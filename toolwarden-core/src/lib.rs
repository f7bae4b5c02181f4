//! ToolWarden Core: transport-agnostic enforcement for MCP tool calls.
//!
//! This library holds the interception and policy pipeline shared by the
//! HTTP proxy (`toolwarden-proxy`): JSON-RPC classification, the tool
//! registry and its rate windows, the sanitizer, the policy engine, session
//! tracking, and the forwarder that relays admitted calls to the target.

pub mod error;
pub mod forwarder;
pub mod interceptor;
pub mod jsonrpc;
pub mod metrics;
pub mod policy;
pub mod rate_limiter;
pub mod registry;
pub mod sanitizer;
pub mod session;
pub mod transport;

pub use error::ToolWardenError;
