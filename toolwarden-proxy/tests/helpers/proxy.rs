//! In-process proxy on an ephemeral port.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use toolwarden_proxy::config::ProxyConfig;
use toolwarden_proxy::server::{AppState, build_router};

/// A running proxy. Stops when dropped.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub state: Arc<AppState>,
    shutdown: CancellationToken,
}

impl TestProxy {
    /// Start a proxy in front of `target_url` (the full MCP endpoint URL).
    pub async fn start(target_url: &str) -> Self {
        Self::start_with(ProxyConfig::for_target(target_url)).await
    }

    pub async fn start_with(config: ProxyConfig) -> Self {
        let state = Arc::new(AppState::from_config(&config).expect("proxy state"));
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let shutdown = CancellationToken::new();

        let router = build_router(state.clone());
        let stop = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { stop.cancelled().await })
                .await
                .expect("serve");
        });

        Self {
            addr,
            state,
            shutdown,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
