//! Test helpers for ToolWarden integration tests.
//!
//! - A wiremock stand-in for the target MCP server
//! - An in-process proxy bound to an ephemeral port
//! - A JSON-RPC test client

#![allow(unused_imports)] // Re-exports may not be used by all test files

pub mod proxy;
pub mod target;
pub mod test_client;

pub use proxy::*;
pub use target::*;
pub use test_client::*;
