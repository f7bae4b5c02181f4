//! Error types for the HTTP layer.

use axum::Json;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use toolwarden_core::ToolWardenError;

/// Startup and serving errors. These end the process.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),

    #[error(transparent)]
    Core(#[from] ToolWardenError),
}

/// Plain-text gateway error for relayed requests that carry no JSON-RPC id
/// to answer with.
pub fn gateway_error_response(error: &ToolWardenError) -> Response {
    let (status, message) = match error {
        ToolWardenError::UpstreamTimeout { .. } => (
            StatusCode::GATEWAY_TIMEOUT,
            "504 Gateway Timeout\n\nMCP server did not respond in time.",
        ),
        _ => (
            StatusCode::BAD_GATEWAY,
            "502 Bad Gateway\n\nFailed to reach MCP server.",
        ),
    };
    (status, [(header::CONTENT_TYPE, "text/plain")], message).into_response()
}

/// Management API errors. State is never changed when one is returned.
#[derive(Error, Debug, PartialEq)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("unknown tool '{0}'")]
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
