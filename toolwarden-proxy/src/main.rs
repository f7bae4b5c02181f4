//! ToolWarden - security proxy for MCP tool traffic.
//!
//! Sits between an MCP client and an MCP server on the Streamable HTTP
//! transport and enforces per-tool enablement, per-minute rate limits and
//! prompt-injection screening on every tool call.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use toolwarden_proxy::config::{Cli, ProxyConfig};
use toolwarden_proxy::server::{AppState, serve};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // The guard must live until exit so buffered log lines are flushed.
    let (non_blocking, _guard) = tracing_appender::non_blocking(std::io::stdout());
    tracing_subscriber::fmt()
        .json()
        .with_writer(non_blocking)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match ProxyConfig::try_from(Cli::parse()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration, refusing to start");
            return Err(e.into());
        }
    };

    let state = Arc::new(AppState::from_config(&config)?);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        model_classifier = config.classifier.is_some(),
        inspection_timeout_ms = config.sanitizer.timeout.as_millis() as u64,
        "ToolWarden starting"
    );

    let shutdown = CancellationToken::new();
    setup_signal_handlers(shutdown.clone());

    serve(&config, state, shutdown).await?;
    info!("ToolWarden stopped");
    Ok(())
}

fn setup_signal_handlers(shutdown: CancellationToken) {
    let shutdown_sigint = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                shutdown_sigint.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for SIGINT"),
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM, initiating graceful shutdown");
                shutdown.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for SIGTERM"),
        }
    });
}
