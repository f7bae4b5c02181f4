//! Process configuration.
//!
//! Read once at startup from command-line flags with `TOOLWARDEN_*`
//! environment fallbacks, validated, and frozen into a [`ProxyConfig`].
//! Only per-tool enablement and rate limits change afterwards, through the
//! management API.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use toolwarden_core::registry::{DEFAULT_MAX_TOOLS, DEFAULT_RATE_LIMIT, RegistryConfig};
use toolwarden_core::sanitizer::{
    DEFAULT_INSPECTION_TIMEOUT, DEFAULT_THRESHOLD, HttpClassifierConfig, SanitizerConfig,
};
use toolwarden_core::session::SessionConfig;
use toolwarden_core::transport::upstream::{DEFAULT_TARGET_URL, UpstreamConfig};

use crate::error::ProxyError;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 8124;

/// Default limit on client request bodies (1 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Command-line interface.
#[derive(Parser, Debug, Clone)]
#[command(name = "toolwarden", author, version, about, long_about = None)]
pub struct Cli {
    /// Target MCP server endpoint
    #[arg(long, env = "TOOLWARDEN_TARGET_URL", default_value = DEFAULT_TARGET_URL)]
    pub target_url: String,

    /// Address to bind
    #[arg(short, long, env = "TOOLWARDEN_BIND", default_value = "127.0.0.1")]
    pub bind: String,

    /// Port for the MCP endpoint and the management API
    #[arg(short, long, env = "TOOLWARDEN_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Calls per minute allowed for tools without an explicit limit
    #[arg(long, env = "TOOLWARDEN_DEFAULT_RATE_LIMIT", default_value_t = DEFAULT_RATE_LIMIT)]
    pub default_rate_limit: u32,

    /// Most tools learned from traffic; calls to further unseen names are refused
    #[arg(long, env = "TOOLWARDEN_MAX_TOOLS", default_value_t = DEFAULT_MAX_TOOLS)]
    pub max_tools: usize,

    /// Prompt-injection classifier endpoint. Rule-based screening only when unset.
    #[arg(long, env = "TOOLWARDEN_CLASSIFIER_URL")]
    pub classifier_url: Option<String>,

    /// Injection probability above which content is flagged
    #[arg(long, env = "TOOLWARDEN_CLASSIFIER_THRESHOLD", default_value_t = DEFAULT_THRESHOLD)]
    pub classifier_threshold: f32,

    /// Deadline for the classifier, in milliseconds
    #[arg(long, env = "TOOLWARDEN_INSPECTION_TIMEOUT_MS", default_value_t = DEFAULT_INSPECTION_TIMEOUT.as_millis() as u64)]
    pub inspection_timeout_ms: u64,

    /// Deadline for a target response, in seconds
    #[arg(long, env = "TOOLWARDEN_UPSTREAM_TIMEOUT_SECS", default_value_t = 30)]
    pub upstream_timeout_secs: u64,

    /// Sessions idle longer than this are dropped, in seconds
    #[arg(long, env = "TOOLWARDEN_SESSION_IDLE_SECS", default_value_t = 30 * 60)]
    pub session_idle_secs: u64,

    /// Largest accepted client request body, in bytes
    #[arg(long, env = "TOOLWARDEN_MAX_BODY_BYTES", default_value_t = DEFAULT_MAX_BODY_BYTES)]
    pub max_body_bytes: usize,
}

/// Validated, immutable proxy configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub listen_addr: SocketAddr,
    pub upstream: UpstreamConfig,
    pub registry: RegistryConfig,
    pub sanitizer: SanitizerConfig,
    /// `None` runs the rule classifier alone
    pub classifier: Option<HttpClassifierConfig>,
    pub sessions: SessionConfig,
    pub max_body_bytes: usize,
}

impl ProxyConfig {
    /// Configuration for an in-process proxy pointed at `target_url`, with
    /// defaults everywhere else.
    pub fn for_target(target_url: impl Into<String>) -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            upstream: UpstreamConfig::with_target_url(target_url),
            registry: RegistryConfig::default(),
            sanitizer: SanitizerConfig::default(),
            classifier: None,
            sessions: SessionConfig::default(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl TryFrom<Cli> for ProxyConfig {
    type Error = ProxyError;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let url = reqwest::Url::parse(&cli.target_url).map_err(|e| {
            ProxyError::Config(format!("invalid target url '{}': {e}", cli.target_url))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ProxyError::Config(format!(
                "target url must be http or https, got '{}'",
                url.scheme()
            )));
        }

        let listen_addr: SocketAddr = format!("{}:{}", cli.bind, cli.port)
            .parse()
            .map_err(|e| ProxyError::Config(format!("invalid bind address '{}': {e}", cli.bind)))?;

        if !(0.0..=1.0).contains(&cli.classifier_threshold) {
            return Err(ProxyError::Config(format!(
                "classifier threshold must be within [0, 1], got {}",
                cli.classifier_threshold
            )));
        }
        if cli.max_tools == 0 {
            return Err(ProxyError::Config("max tools must be greater than zero".to_string()));
        }
        if cli.inspection_timeout_ms == 0 {
            return Err(ProxyError::Config(
                "inspection timeout must be greater than zero".to_string(),
            ));
        }
        if cli.upstream_timeout_secs == 0 {
            return Err(ProxyError::Config(
                "upstream timeout must be greater than zero".to_string(),
            ));
        }

        let classifier = cli.classifier_url.map(|url| HttpClassifierConfig {
            threshold: cli.classifier_threshold,
            ..HttpClassifierConfig::new(url)
        });

        Ok(Self {
            listen_addr,
            upstream: UpstreamConfig {
                timeout: Duration::from_secs(cli.upstream_timeout_secs),
                ..UpstreamConfig::with_target_url(cli.target_url)
            },
            registry: RegistryConfig {
                default_rate_limit: cli.default_rate_limit,
                max_tools: cli.max_tools,
                ..RegistryConfig::default()
            },
            sanitizer: SanitizerConfig {
                timeout: Duration::from_millis(cli.inspection_timeout_ms),
            },
            classifier,
            sessions: SessionConfig {
                idle_timeout: Duration::from_secs(cli.session_idle_secs),
                ..SessionConfig::default()
            },
            max_body_bytes: cli.max_body_bytes,
        })
    }
}
