//! Application state, router assembly, and the serve loop.
//!
//! One listener serves both the MCP passthrough (`/mcp`) and the management
//! API (`/api`, `/health`, `/metrics`).

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::any;
use prometheus_client::registry::Registry;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use toolwarden_core::forwarder::Forwarder;
use toolwarden_core::metrics::ToolWardenMetrics;
use toolwarden_core::policy::PolicyEngine;
use toolwarden_core::registry::ToolRegistry;
use toolwarden_core::sanitizer::{Classifier, HttpClassifier, Sanitizer};
use toolwarden_core::session::SessionTracker;
use toolwarden_core::transport::upstream::{UpstreamClient, UpstreamForwarder};

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::logging_layer::logging_layer;
use crate::management;
use crate::mcp_handler::handle_mcp;

/// Everything a request handler can reach.
pub struct AppState {
    pub registry: Arc<ToolRegistry>,
    pub policy: Arc<PolicyEngine>,
    pub sessions: Arc<SessionTracker>,
    pub forwarder: Arc<Forwarder>,
    pub metrics: Arc<ToolWardenMetrics>,
    pub prom_registry: Arc<Registry>,
    pub max_body_bytes: usize,
}

impl AppState {
    /// Wire the pipeline against the configured target and classifier.
    ///
    /// # Errors
    ///
    /// Fails if the target or classifier URL is unusable.
    pub fn from_config(config: &ProxyConfig) -> Result<Self, ProxyError> {
        let mut prom_registry = Registry::default();
        let metrics = Arc::new(ToolWardenMetrics::new(&mut prom_registry));

        let upstream: Arc<dyn UpstreamForwarder> = Arc::new(
            UpstreamClient::new(config.upstream.clone())?.with_metrics(metrics.clone()),
        );
        let classifier: Option<Arc<dyn Classifier>> = match config.classifier {
            Some(ref classifier) => Some(Arc::new(
                HttpClassifier::new(classifier.clone())
                    .map_err(|e| ProxyError::Config(e.to_string()))?,
            )),
            None => None,
        };

        Self::assemble(config, upstream, classifier, prom_registry, metrics)
    }

    /// Wire the pipeline against caller-supplied backends.
    pub fn with_backends(
        config: &ProxyConfig,
        upstream: Arc<dyn UpstreamForwarder>,
        classifier: Option<Arc<dyn Classifier>>,
    ) -> Result<Self, ProxyError> {
        let mut prom_registry = Registry::default();
        let metrics = Arc::new(ToolWardenMetrics::new(&mut prom_registry));
        Self::assemble(config, upstream, classifier, prom_registry, metrics)
    }

    fn assemble(
        config: &ProxyConfig,
        upstream: Arc<dyn UpstreamForwarder>,
        classifier: Option<Arc<dyn Classifier>>,
        prom_registry: Registry,
        metrics: Arc<ToolWardenMetrics>,
    ) -> Result<Self, ProxyError> {
        let registry = Arc::new(
            ToolRegistry::new(config.registry.clone()).with_metrics(metrics.clone()),
        );
        let sanitizer = Arc::new(
            Sanitizer::new(classifier, config.sanitizer.clone())
                .map_err(|e| ProxyError::Config(format!("rule set failed to compile: {e}")))?
                .with_metrics(metrics.clone()),
        );
        let policy = Arc::new(
            PolicyEngine::new(registry.clone(), sanitizer).with_metrics(metrics.clone()),
        );
        let sessions = Arc::new(
            SessionTracker::new(config.sessions.clone()).with_metrics(metrics.clone()),
        );
        let forwarder = Arc::new(Forwarder::new(upstream, policy.clone(), sessions.clone()));

        Ok(Self {
            registry,
            policy,
            sessions,
            forwarder,
            metrics,
            prom_registry: Arc::new(prom_registry),
            max_body_bytes: config.max_body_bytes,
        })
    }
}

/// Build the full application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let max_body = state.max_body_bytes;
    Router::new()
        .route("/mcp", any(handle_mcp))
        .route("/mcp/{*path}", any(handle_mcp))
        .merge(management::router())
        .layer(DefaultBodyLimit::max(max_body))
        .layer(logging_layer())
        .with_state(state)
}

/// Serve until `shutdown` is cancelled.
///
/// # Errors
///
/// Binding failures and I/O errors from the accept loop.
pub async fn serve(
    config: &ProxyConfig,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> Result<(), ProxyError> {
    let addr = config.listen_addr.to_string();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| ProxyError::Bind {
            addr: addr.clone(),
            source,
        })?;

    state.sessions.spawn_sweeper(shutdown.clone());

    info!(
        addr = %addr,
        target_url = %config.upstream.target_url,
        classifier = config.classifier.as_ref().map(|c| c.url.as_str()).unwrap_or("rules-only"),
        default_rate_limit = config.registry.default_rate_limit,
        "ToolWarden proxy listening"
    );

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("Proxy shutting down");
        })
        .await
        .map_err(ProxyError::Serve)
}
