//! ToolWarden HTTP proxy.
//!
//! This crate contains the HTTP layer around `toolwarden-core`: process
//! configuration, the MCP endpoint, the management API, and router
//! assembly.

pub mod config;
pub mod error;
pub mod logging_layer;
pub mod management;
pub mod mcp_handler;
pub mod server;
