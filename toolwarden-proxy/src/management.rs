//! Management API over the tool registry.
//!
//! # Endpoints
//!
//! - `GET /api/tools` - every known tool with its current window usage
//! - `POST /api/toggle-tool` - flip (or set) a tool's enabled flag
//! - `POST /api/update-rate-limit` - change a tool's per-minute limit
//! - `GET /api/stats` - per-tool outcome counters and totals
//! - `GET /health` - liveness
//! - `GET /metrics` - Prometheus metrics in OpenMetrics text format
//!
//! Writes take effect on the next admission check. Invalid input leaves the
//! registry untouched.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use toolwarden_core::registry::{RegistryStats, Tool};

use crate::error::ApiError;
use crate::server::AppState;

const OPENMETRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Routes served next to the MCP endpoint.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/tools", get(list_tools))
        .route("/api/toggle-tool", post(toggle_tool))
        .route("/api/update-rate-limit", post(update_rate_limit))
        .route("/api/stats", get(stats))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
}

#[derive(Debug, Deserialize)]
pub struct ToggleToolRequest {
    #[serde(alias = "tool_name")]
    pub name: Option<String>,
    /// Sets the flag instead of flipping it
    pub enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRateLimitRequest {
    #[serde(alias = "tool_name")]
    pub name: Option<String>,
    #[serde(rename = "rateLimitPerMinute", alias = "rate_limit")]
    pub rate_limit_per_minute: Option<i64>,
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

fn required_name(name: Option<String>) -> Result<String, ApiError> {
    name.filter(|n| !n.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing tool name".to_string()))
}

async fn list_tools(State(state): State<Arc<AppState>>) -> Json<Vec<Tool>> {
    Json(state.registry.snapshot())
}

async fn toggle_tool(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ToggleToolRequest>, JsonRejection>,
) -> Result<Json<Tool>, ApiError> {
    let request = body(payload)?;
    let name = required_name(request.name)?;

    let tool = state
        .registry
        .toggle_enabled(&name, request.enabled)
        .ok_or(ApiError::NotFound(name))?;
    info!(tool = %tool.name, enabled = tool.enabled, "Tool enablement changed");
    Ok(Json(tool))
}

async fn update_rate_limit(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<UpdateRateLimitRequest>, JsonRejection>,
) -> Result<Json<Tool>, ApiError> {
    let request = body(payload)?;
    let name = required_name(request.name)?;
    let limit = request
        .rate_limit_per_minute
        .ok_or_else(|| ApiError::BadRequest("missing rateLimitPerMinute".to_string()))?;
    let limit = u32::try_from(limit).map_err(|_| {
        ApiError::BadRequest(format!(
            "rateLimitPerMinute must be a non-negative integer no larger than {}, got {limit}",
            u32::MAX
        ))
    })?;

    let tool = state
        .registry
        .update_rate_limit(&name, limit)
        .ok_or(ApiError::NotFound(name))?;
    info!(
        tool = %tool.name,
        rate_limit_per_minute = tool.rate_limit_per_minute,
        "Tool rate limit changed"
    );
    Ok(Json(tool))
}

async fn stats(State(state): State<Arc<AppState>>) -> Json<RegistryStats> {
    Json(state.registry.stats())
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "tools": state.registry.len(),
        "sessions": state.sessions.len(),
    }))
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let mut buffer = String::new();
    if let Err(e) = prometheus_client::encoding::text::encode(&mut buffer, &state.prom_registry) {
        error!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {e}"),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)],
        buffer,
    )
        .into_response()
}
