//! Tower layer for structured request/response logging.
//!
//! `tower_http::trace::TraceLayer` with callbacks that tag every request
//! span with a correlation id and redact credentials from logged headers.

use std::fmt;

use http::HeaderMap;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Headers never written to logs.
const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "cookie",
    "x-api-key",
    "x-auth-token",
    "proxy-authorization",
    "set-cookie",
];

/// Logged header values are cut at this length.
const MAX_VALUE_LEN: usize = 1024;
const MAX_HEADERS_TO_LOG: usize = 50;

pub fn logging_layer() -> TraceLayer<
    tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>,
    CorrelationMakeSpan,
    OnRequestLogger,
    OnResponseLogger,
    tower_http::trace::DefaultOnBodyChunk,
    tower_http::trace::DefaultOnEos,
    OnFailureLogger,
> {
    TraceLayer::new_for_http()
        .make_span_with(CorrelationMakeSpan)
        .on_request(OnRequestLogger)
        .on_response(OnResponseLogger)
        .on_failure(OnFailureLogger)
}

/// Opens a request span carrying `request_id`, taken from `x-request-id`
/// or generated.
#[derive(Clone, Debug)]
pub struct CorrelationMakeSpan;

impl<B> tower_http::trace::MakeSpan<B> for CorrelationMakeSpan {
    fn make_span(&mut self, request: &http::Request<B>) -> tracing::Span {
        let request_id = request
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .unwrap_or_else(|| toolwarden_core::jsonrpc::fast_correlation_id().to_string());

        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Clone, Debug)]
pub struct OnRequestLogger;

impl<B> tower_http::trace::OnRequest<B> for OnRequestLogger {
    fn on_request(&mut self, request: &http::Request<B>, _span: &tracing::Span) {
        info!(
            method = %request.method(),
            uri = %request.uri(),
            direction = "inbound",
            "Request received"
        );

        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!(headers = ?SanitizedHeaders(request.headers()), "Request headers");
        }
    }
}

#[derive(Clone, Debug)]
pub struct OnResponseLogger;

impl<B> tower_http::trace::OnResponse<B> for OnResponseLogger {
    fn on_response(
        self,
        response: &http::Response<B>,
        latency: std::time::Duration,
        _span: &tracing::Span,
    ) {
        info!(
            status = response.status().as_u16(),
            latency_ms = latency.as_millis() as u64,
            direction = "outbound",
            "Response sent"
        );

        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!(headers = ?SanitizedHeaders(response.headers()), "Response headers");
        }
    }
}

#[derive(Clone, Debug)]
pub struct OnFailureLogger;

impl tower_http::trace::OnFailure<tower_http::classify::ServerErrorsFailureClass>
    for OnFailureLogger
{
    fn on_failure(
        &mut self,
        failure: tower_http::classify::ServerErrorsFailureClass,
        latency: std::time::Duration,
        _span: &tracing::Span,
    ) {
        warn!(
            classification = %failure,
            latency_ms = latency.as_millis() as u64,
            "Request failed"
        );
    }
}

/// Debug view of a header map with credentials replaced.
struct SanitizedHeaders<'a>(&'a HeaderMap);

impl fmt::Debug for SanitizedHeaders<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (idx, (name, value)) in self.0.iter().enumerate() {
            if idx >= MAX_HEADERS_TO_LOG {
                map.entry(&"...", &format!("({} more headers)", self.0.len() - idx));
                break;
            }

            let name = name.as_str();
            if SENSITIVE_HEADERS
                .iter()
                .any(|sensitive| name.eq_ignore_ascii_case(sensitive))
            {
                map.entry(&name, &"[REDACTED]");
                continue;
            }

            match value.to_str() {
                Ok(v) if v.len() <= MAX_VALUE_LEN => {
                    map.entry(&name, &v);
                }
                Ok(v) => {
                    // to_str succeeds only for visible ASCII
                    map.entry(
                        &name,
                        &format!("{}... ({} bytes)", &v[..MAX_VALUE_LEN], v.len()),
                    );
                }
                Err(_) => {
                    map.entry(&name, &format!("<binary: {} bytes>", value.len()));
                }
            }
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_sensitive_headers_redacted() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer secret"));
        headers.insert("x-api-key", HeaderValue::from_static("k-123"));
        headers.insert("mcp-session-id", HeaderValue::from_static("abc"));

        let rendered = format!("{:?}", SanitizedHeaders(&headers));
        assert!(!rendered.contains("secret"));
        assert!(!rendered.contains("k-123"));
        assert!(rendered.contains("[REDACTED]"));
        assert!(rendered.contains("abc"));
    }

    #[test]
    fn test_long_values_truncated() {
        let mut headers = HeaderMap::new();
        let long = "a".repeat(MAX_VALUE_LEN + 10);
        headers.insert("x-long", HeaderValue::from_str(&long).unwrap());
        let rendered = format!("{:?}", SanitizedHeaders(&headers));
        assert!(rendered.contains(&format!("({} bytes)", MAX_VALUE_LEN + 10)));
    }
}
