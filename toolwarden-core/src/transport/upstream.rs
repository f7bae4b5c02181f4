//! HTTP client for the target MCP server, with connection pooling.
//!
//! Requests are relayed one-for-one: method, path suffix, query, body and
//! end-to-end headers go out unchanged. Responses come back either fully
//! buffered (for anything the proxy must inspect) or as a byte stream (for
//! long-lived SSE channels and everything else).
//!
//! # Error Classification
//!
//! - Timeout errors → UpstreamTimeout (-32001)
//! - Connection errors → UpstreamConnectionFailed (-32000)
//! - Other errors → UpstreamError (-32002)
//!
//! # Security
//!
//! - Redirects are never followed and `Location` is never relayed, so a
//!   target cannot bounce a client to a different origin through the proxy.
//! - Hop-by-hop headers are stripped in both directions.
//! - No automatic retry (prevents duplicate tool side effects).

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use http::header::{self, HeaderMap, HeaderName};
use http::{Method, StatusCode};
use reqwest::Client;
use tracing::{debug, error, warn};

use crate::error::ToolWardenError;
use crate::metrics::ToolWardenMetrics;

/// Default target, matching the reference weather server.
pub const DEFAULT_TARGET_URL: &str = "http://localhost:8123/mcp";

/// Configuration for the upstream client.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Full URL of the target MCP endpoint (e.g., "http://localhost:8123/mcp")
    pub target_url: String,
    /// Time allowed for a buffered exchange, or for response headers on a stream
    pub timeout: Duration,
    /// Connection timeout (TCP + TLS handshake)
    pub connect_timeout: Duration,
    /// Maximum idle connections per host
    pub pool_max_idle_per_host: usize,
    /// Idle connection timeout
    pub pool_idle_timeout: Duration,
    /// Maximum buffered response body size in bytes (default: 10MB).
    pub max_response_size: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            target_url: DEFAULT_TARGET_URL.to_string(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            pool_max_idle_per_host: 32,
            pool_idle_timeout: Duration::from_secs(90),
            max_response_size: 10 * 1024 * 1024,
        }
    }
}

impl UpstreamConfig {
    /// Create a config for the given target, defaults elsewhere.
    pub fn with_target_url(target_url: impl Into<String>) -> Self {
        Self {
            target_url: target_url.into(),
            ..Default::default()
        }
    }
}

/// A client request to relay to the target.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    /// HTTP method
    pub method: Method,
    /// Path below the proxy's `/mcp` mount, empty or starting with `/`
    pub path_suffix: String,
    /// Raw query string, without the leading `?`
    pub query: Option<String>,
    /// Client request headers
    pub headers: HeaderMap,
    /// Request body
    pub body: Bytes,
}

impl ForwardRequest {
    /// A bare POST with the given body and no extra headers.
    pub fn post(body: impl Into<Bytes>) -> Self {
        Self {
            method: Method::POST,
            path_suffix: String::new(),
            query: None,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }
}

/// A fully read target response.
#[derive(Debug, Clone)]
pub struct BufferedResponse {
    pub status: StatusCode,
    /// End-to-end headers only
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl BufferedResponse {
    /// The `Content-Type` header, if present and valid UTF-8.
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }
}

/// Body of a streamed target response.
pub type ByteStream = BoxStream<'static, Result<Bytes, ToolWardenError>>;

/// A target response whose body is relayed as it arrives.
pub struct StreamingResponse {
    pub status: StatusCode,
    /// End-to-end headers only
    pub headers: HeaderMap,
    pub body: ByteStream,
}

impl std::fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Upstream MCP client.
///
/// The client is `Clone` and can be shared across tasks. The underlying
/// reqwest client handles connection pooling internally.
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client,
    config: UpstreamConfig,
    metrics: Option<Arc<ToolWardenMetrics>>,
}

impl UpstreamClient {
    /// Create a new upstream client.
    ///
    /// # Errors
    ///
    /// Returns `ToolWardenError::InternalError` if the target URL is empty
    /// or not absolute, or if the HTTP client cannot be built.
    pub fn new(config: UpstreamConfig) -> Result<Self, ToolWardenError> {
        if config.target_url.is_empty() {
            return Err(ToolWardenError::InternalError {
                correlation_id: "upstream-client-config-error: target_url is empty".to_string(),
            });
        }

        if let Err(e) = reqwest::Url::parse(&config.target_url) {
            return Err(ToolWardenError::InternalError {
                correlation_id: format!(
                    "upstream-client-config-error: invalid target_url '{}': {}",
                    config.target_url, e
                ),
            });
        }

        // No client-wide timeout: it would also cut long-lived SSE streams.
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(config.pool_idle_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .tcp_nodelay(true)
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| ToolWardenError::InternalError {
                correlation_id: format!("upstream-client-build-error: {}", e),
            })?;

        Ok(Self {
            client,
            config,
            metrics: None,
        })
    }

    /// Record upstream request counts and latencies.
    pub fn with_metrics(mut self, metrics: Arc<ToolWardenMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The configured target URL.
    pub fn target_url(&self) -> &str {
        &self.config.target_url
    }

    fn build(&self, request: &ForwardRequest) -> reqwest::RequestBuilder {
        let url = join_target_url(
            &self.config.target_url,
            &request.path_suffix,
            request.query.as_deref(),
        );
        self.client
            .request(request.method.clone(), url)
            .headers(filter_request_headers(&request.headers))
            .body(request.body.clone())
    }

    fn record(&self, kind: &str, status: &str, started: Instant) {
        if let Some(ref metrics) = self.metrics {
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            metrics.record_upstream_request(kind, status, elapsed_ms);
        }
    }

    /// Relay a request and read the whole response body.
    ///
    /// The configured timeout covers the full exchange.
    #[tracing::instrument(skip(self, request), fields(method = %request.method, path = %request.path_suffix))]
    pub async fn forward_buffered(
        &self,
        request: &ForwardRequest,
    ) -> Result<BufferedResponse, ToolWardenError> {
        debug!(target_url = %self.config.target_url, "Forwarding request to target");
        let started = Instant::now();

        let response = match self
            .build(request)
            .timeout(self.config.timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                self.record("buffered", "error", started);
                return Err(self.classify_error(e));
            }
        };

        let status = response.status();
        let headers = filter_response_headers(response.headers());
        let body = self.read_body_limited(response).await;
        self.record("buffered", status.as_str(), started);
        let body = body?;

        debug!(status = %status, body_size = body.len(), "Received target response");

        Ok(BufferedResponse {
            status,
            headers,
            body,
        })
    }

    /// Relay a request and return the response body as a stream.
    ///
    /// The configured timeout covers only the wait for response headers; the
    /// body may stay open indefinitely.
    #[tracing::instrument(skip(self, request), fields(method = %request.method, path = %request.path_suffix))]
    pub async fn forward_streaming(
        &self,
        request: &ForwardRequest,
    ) -> Result<StreamingResponse, ToolWardenError> {
        let started = Instant::now();
        let sent = tokio::time::timeout(self.config.timeout, self.build(request).send()).await;

        let response = match sent {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                self.record("stream", "error", started);
                return Err(self.classify_error(e));
            }
            Err(_) => {
                self.record("stream", "timeout", started);
                warn!(
                    timeout_secs = self.config.timeout.as_secs(),
                    "Target did not send response headers in time"
                );
                return Err(self.timeout_error());
            }
        };

        let status = response.status();
        self.record("stream", status.as_str(), started);
        let headers = filter_response_headers(response.headers());
        let body = response
            .bytes_stream()
            .map(|chunk| {
                chunk.map_err(|e| ToolWardenError::UpstreamError {
                    status: None,
                    message: format!("target stream interrupted: {e}"),
                })
            })
            .boxed();

        Ok(StreamingResponse {
            status,
            headers,
            body,
        })
    }

    /// Read the response body with a size limit.
    ///
    /// Checks `Content-Length` first for early rejection, then enforces the
    /// limit chunk by chunk for bodies without one.
    async fn read_body_limited(
        &self,
        mut response: reqwest::Response,
    ) -> Result<Bytes, ToolWardenError> {
        let max_size = self.config.max_response_size;

        if let Some(content_length) = response.content_length()
            && content_length as usize > max_size
        {
            warn!(
                content_length,
                max_response_size = max_size,
                "Target response exceeds size limit (Content-Length)"
            );
            return Err(ToolWardenError::UpstreamError {
                status: Some(response.status().as_u16()),
                message: format!(
                    "target response too large: {content_length} bytes exceeds {max_size} byte limit"
                ),
            });
        }

        let mut buf = Vec::with_capacity(
            response
                .content_length()
                .map(|cl| cl as usize)
                .unwrap_or(8192)
                .min(max_size),
        );

        while let Some(chunk) = response.chunk().await.map_err(|e| {
            if e.is_timeout() {
                return self.timeout_error();
            }
            error!(error = %e, "Failed to read target response body chunk");
            ToolWardenError::UpstreamError {
                status: None,
                message: format!("failed to read target response: {e}"),
            }
        })? {
            if buf.len() + chunk.len() > max_size {
                warn!(
                    accumulated = buf.len(),
                    chunk_size = chunk.len(),
                    max_response_size = max_size,
                    "Target response exceeds size limit during streaming"
                );
                return Err(ToolWardenError::UpstreamError {
                    status: None,
                    message: format!(
                        "target response too large: >={} bytes exceeds {max_size} byte limit",
                        buf.len() + chunk.len()
                    ),
                });
            }
            buf.extend_from_slice(&chunk);
        }

        Ok(buf.into())
    }

    fn timeout_error(&self) -> ToolWardenError {
        ToolWardenError::UpstreamTimeout {
            url: self.config.target_url.clone(),
            timeout_secs: self.config.timeout.as_secs(),
        }
    }

    fn classify_error(&self, error: reqwest::Error) -> ToolWardenError {
        if error.is_timeout() {
            warn!(
                timeout_secs = self.config.timeout.as_secs(),
                "Target request timed out"
            );
            self.timeout_error()
        } else if error.is_connect() {
            warn!(url = %self.config.target_url, "Failed to connect to target");
            ToolWardenError::UpstreamConnectionFailed {
                url: self.config.target_url.clone(),
                reason: error.to_string(),
            }
        } else {
            error!(error = %error, "Target request failed");
            ToolWardenError::UpstreamError {
                status: None,
                message: error.to_string(),
            }
        }
    }
}

/// Map a non-success status without a usable JSON-RPC body to an error.
pub fn classify_upstream_status(status: StatusCode) -> ToolWardenError {
    let message = match status.as_u16() {
        401 | 403 => format!("target authentication error: HTTP {status}"),
        404 => format!("target endpoint not found: HTTP {status}"),
        400..=499 => format!("target rejected the request: HTTP {status}"),
        _ => format!("target server error: HTTP {status}"),
    };
    ToolWardenError::UpstreamError {
        status: Some(status.as_u16()),
        message,
    }
}

/// Join the target URL with a path suffix and query.
///
/// `http://host/mcp` + `/messages` → `http://host/mcp/messages`. An empty
/// suffix leaves the target path untouched.
pub fn join_target_url(target: &str, path_suffix: &str, query: Option<&str>) -> String {
    let mut url = if path_suffix.is_empty() || path_suffix == "/" {
        target.to_string()
    } else {
        format!(
            "{}/{}",
            target.trim_end_matches('/'),
            path_suffix.trim_start_matches('/')
        )
    };
    if let Some(q) = query.filter(|q| !q.is_empty()) {
        url.push(if url.contains('?') { '&' } else { '?' });
        url.push_str(q);
    }
    url
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

fn connection_listed(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect()
}

fn filter_headers(headers: &HeaderMap, extra: &[HeaderName]) -> HeaderMap {
    let listed = connection_listed(headers);
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if is_hop_by_hop(name)
            || extra.contains(name)
            || listed.iter().any(|l| l == name.as_str())
        {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Client headers safe to send to the target.
///
/// Drops hop-by-hop headers, `Host` and `Content-Length` (the client sets
/// both for the outbound connection).
pub fn filter_request_headers(headers: &HeaderMap) -> HeaderMap {
    filter_headers(headers, &[header::HOST, header::CONTENT_LENGTH])
}

/// Target headers safe to relay to the client.
///
/// Drops hop-by-hop headers, `Location`, and `Content-Length` (bodies may
/// be rewritten).
pub fn filter_response_headers(headers: &HeaderMap) -> HeaderMap {
    filter_headers(headers, &[header::LOCATION, header::CONTENT_LENGTH])
}

/// Trait for the target client (enables mocking in tests).
#[async_trait::async_trait]
pub trait UpstreamForwarder: Send + Sync {
    /// Relay a request and buffer the full response.
    async fn forward(&self, request: &ForwardRequest) -> Result<BufferedResponse, ToolWardenError>;

    /// Relay a request and stream the response body.
    async fn stream(&self, request: &ForwardRequest)
    -> Result<StreamingResponse, ToolWardenError>;
}

#[async_trait::async_trait]
impl UpstreamForwarder for UpstreamClient {
    async fn forward(&self, request: &ForwardRequest) -> Result<BufferedResponse, ToolWardenError> {
        self.forward_buffered(request).await
    }

    async fn stream(
        &self,
        request: &ForwardRequest,
    ) -> Result<StreamingResponse, ToolWardenError> {
        self.forward_streaming(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use wiremock::matchers::{body_string, header as header_matcher, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> UpstreamClient {
        UpstreamClient::new(UpstreamConfig::with_target_url(format!(
            "{}/mcp",
            server.uri()
        )))
        .unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = UpstreamConfig::default();
        assert_eq!(config.target_url, "http://localhost:8123/mcp");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_upstream_client_rejects_bad_urls() {
        assert!(UpstreamClient::new(UpstreamConfig::with_target_url("")).is_err());
        assert!(matches!(
            UpstreamClient::new(UpstreamConfig::with_target_url("not-a-valid-url")),
            Err(ToolWardenError::InternalError { .. })
        ));
        assert!(UpstreamClient::new(UpstreamConfig::default()).is_ok());
    }

    #[test]
    fn test_join_target_url() {
        assert_eq!(
            join_target_url("http://h:1/mcp", "", None),
            "http://h:1/mcp"
        );
        assert_eq!(
            join_target_url("http://h:1/mcp/", "/messages", Some("a=1")),
            "http://h:1/mcp/messages?a=1"
        );
        assert_eq!(
            join_target_url("http://h:1/mcp", "/", Some("")),
            "http://h:1/mcp"
        );
    }

    #[test]
    fn test_header_filtering() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("proxy:8124"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("close, x-hop"));
        headers.insert("x-hop", HeaderValue::from_static("1"));
        headers.insert("mcp-session-id", HeaderValue::from_static("abc"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer t"));
        headers.insert(header::LOCATION, HeaderValue::from_static("http://evil/"));

        let outbound = filter_request_headers(&headers);
        assert!(outbound.get(header::HOST).is_none());
        assert!(outbound.get("x-hop").is_none());
        assert!(outbound.get(header::CONNECTION).is_none());
        assert_eq!(outbound["mcp-session-id"], "abc");
        assert_eq!(outbound[header::AUTHORIZATION], "Bearer t");

        let inbound = filter_response_headers(&headers);
        assert!(inbound.get(header::LOCATION).is_none());
        assert_eq!(inbound["mcp-session-id"], "abc");
    }

    #[tokio::test]
    async fn test_forward_relays_method_path_query_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mcp/messages"))
            .and(query_param("session", "1"))
            .and(header_matcher("mcp-session-id", "sess-9"))
            .and(body_string("{\"x\":1}"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("mcp-session-id", "sess-9")
                    .set_body_raw("{\"ok\":true}", "application/json"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let mut request = ForwardRequest::post("{\"x\":1}");
        request.path_suffix = "/messages".to_string();
        request.query = Some("session=1".to_string());
        request
            .headers
            .insert("mcp-session-id", HeaderValue::from_static("sess-9"));

        let response = client.forward(&request).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.content_type(), Some("application/json"));
        assert_eq!(&response.body[..], b"{\"ok\":true}");
        assert_eq!(response.headers["mcp-session-id"], "sess-9");
    }

    #[tokio::test]
    async fn test_redirects_are_not_followed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("location", "http://elsewhere.invalid/"),
            )
            .mount(&server)
            .await;

        let response = client_for(&server)
            .forward(&ForwardRequest::post("{}"))
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::FOUND);
        assert!(response.headers.get(header::LOCATION).is_none());
    }

    #[tokio::test]
    async fn test_forward_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let config = UpstreamConfig {
            timeout: Duration::from_millis(50),
            ..UpstreamConfig::with_target_url(server.uri())
        };
        let client = UpstreamClient::new(config).unwrap();
        let err = client
            .forward(&ForwardRequest::post("{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolWardenError::UpstreamTimeout { .. }));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let client =
            UpstreamClient::new(UpstreamConfig::with_target_url("http://127.0.0.1:1/mcp")).unwrap();
        let err = client
            .forward(&ForwardRequest::post("{}"))
            .await
            .unwrap_err();
        assert!(err.is_forwarding_failure(), "got {err:?}");
    }

    #[tokio::test]
    async fn test_response_size_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'x'; 2048]))
            .mount(&server)
            .await;

        let config = UpstreamConfig {
            max_response_size: 1024,
            ..UpstreamConfig::with_target_url(server.uri())
        };
        let client = UpstreamClient::new(config).unwrap();
        match client.forward(&ForwardRequest::post("{}")).await {
            Err(ToolWardenError::UpstreamError { message, .. }) => {
                assert!(message.contains("too large"), "got: {message}");
            }
            other => panic!("expected UpstreamError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stream_relays_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("event: message\ndata: {}\n\n", "text/event-stream"),
            )
            .mount(&server)
            .await;

        let mut request = ForwardRequest::post(Bytes::new());
        request.method = Method::GET;
        let mut response = client_for(&server).stream(&request).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);

        let mut collected = Vec::new();
        while let Some(chunk) = response.body.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, b"event: message\ndata: {}\n\n");
    }

    #[test]
    fn test_classify_upstream_status() {
        let err = classify_upstream_status(StatusCode::BAD_GATEWAY);
        assert_eq!(err.to_jsonrpc_code(), -32002);
        assert_eq!(err.safe_details().unwrap()["upstream_status"], 502);
    }
}
