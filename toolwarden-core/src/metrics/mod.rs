//! Prometheus metrics using the prometheus-client crate.
//!
//! [`ToolWardenMetrics`] registers every metric family the proxy exports.
//! The management server encodes the registry at `/metrics` in OpenMetrics
//! text format.

mod cardinality;

pub use cardinality::{CardinalityLimiter, OVERFLOW_LABEL};

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

// ─────────────────────────────────────────────────────────────────────────────
// Label Sets
// ─────────────────────────────────────────────────────────────────────────────

/// Labels for the per-tool call counter.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ToolCallLabels {
    /// Tool name, cardinality-limited
    pub tool: String,
    /// Outcome name as reported by the stats endpoint (e.g. "admitted")
    pub outcome: String,
}

/// Labels for sanitizer verdict counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct VerdictLabels {
    /// "request" (tool arguments) or "response" (tool result)
    pub direction: String,
    /// "model" or "fallback"
    pub source: String,
    /// "benign" or "suspicious"
    pub label: String,
}

/// Labels for inspection latency.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct SourceLabels {
    /// "model" or "fallback"
    pub source: String,
}

/// Labels for classifier fallback counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct FallbackLabels {
    /// Why the model was bypassed: "timeout", "error" or "unconfigured"
    pub reason: String,
}

/// Labels for upstream request counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct UpstreamLabels {
    /// "buffered" or "stream"
    pub kind: String,
    /// HTTP status code, or "error" / "timeout"
    pub status: String,
}

/// Labels for upstream latency.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct KindLabels {
    pub kind: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Histogram Bucket Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Sanitizer latency buckets in milliseconds.
const INSPECTION_BUCKETS: &[f64] = &[
    0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0,
];

/// Upstream call duration buckets in milliseconds.
const UPSTREAM_BUCKETS: &[f64] = &[
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0, 10000.0,
];

/// Maximum distinct tool names tracked as label values.
const MAX_TOOL_LABELS: usize = 200;

// ─────────────────────────────────────────────────────────────────────────────
// ToolWardenMetrics
// ─────────────────────────────────────────────────────────────────────────────

/// Prometheus metrics for ToolWarden.
///
/// All metric names use the "toolwarden_" prefix. The `tool` label is
/// cardinality-limited to 200 distinct values; later tool names map to
/// `"__other__"`.
pub struct ToolWardenMetrics {
    /// Tool calls by final outcome.
    pub tool_calls_total: Family<ToolCallLabels, Counter>,

    /// Sanitizer verdicts by direction, source and label.
    pub sanitizer_verdicts_total: Family<VerdictLabels, Counter>,

    /// Times the rule classifier stood in for the model.
    pub classifier_fallbacks_total: Family<FallbackLabels, Counter>,

    /// Target MCP server calls.
    pub upstream_requests_total: Family<UpstreamLabels, Counter>,

    /// Sanitizer latency in milliseconds.
    pub inspection_duration_ms: Family<SourceLabels, Histogram>,

    /// Target call latency in milliseconds.
    pub upstream_duration_ms: Family<KindLabels, Histogram>,

    /// Sessions currently tracked.
    pub sessions_active: Gauge,

    /// Tools currently in the registry.
    pub tools_registered: Gauge,

    tool_limiter: CardinalityLimiter,
}

impl ToolWardenMetrics {
    /// Create and register all metrics with the given registry.
    pub fn new(registry: &mut Registry) -> Self {
        let tool_calls_total = Family::<ToolCallLabels, Counter>::default();
        registry.register(
            "toolwarden_tool_calls_total",
            "Tool calls by outcome",
            tool_calls_total.clone(),
        );

        let sanitizer_verdicts_total = Family::<VerdictLabels, Counter>::default();
        registry.register(
            "toolwarden_sanitizer_verdicts_total",
            "Sanitizer verdicts by direction, source and label",
            sanitizer_verdicts_total.clone(),
        );

        let classifier_fallbacks_total = Family::<FallbackLabels, Counter>::default();
        registry.register(
            "toolwarden_classifier_fallbacks_total",
            "Inspections decided by the rule classifier instead of the model",
            classifier_fallbacks_total.clone(),
        );

        let upstream_requests_total = Family::<UpstreamLabels, Counter>::default();
        registry.register(
            "toolwarden_upstream_requests_total",
            "Requests relayed to the target MCP server",
            upstream_requests_total.clone(),
        );

        let inspection_duration_ms =
            Family::<SourceLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(INSPECTION_BUCKETS.iter().copied())
            });
        registry.register(
            "toolwarden_inspection_duration_ms",
            "Sanitizer latency in milliseconds",
            inspection_duration_ms.clone(),
        );

        let upstream_duration_ms = Family::<KindLabels, Histogram>::new_with_constructor(|| {
            Histogram::new(UPSTREAM_BUCKETS.iter().copied())
        });
        registry.register(
            "toolwarden_upstream_duration_ms",
            "Target MCP server call latency in milliseconds",
            upstream_duration_ms.clone(),
        );

        let sessions_active = Gauge::default();
        registry.register(
            "toolwarden_sessions_active",
            "MCP sessions currently tracked",
            sessions_active.clone(),
        );

        let tools_registered = Gauge::default();
        registry.register(
            "toolwarden_tools_registered",
            "Tools currently known to the registry",
            tools_registered.clone(),
        );

        Self {
            tool_calls_total,
            sanitizer_verdicts_total,
            classifier_fallbacks_total,
            upstream_requests_total,
            inspection_duration_ms,
            upstream_duration_ms,
            sessions_active,
            tools_registered,
            tool_limiter: CardinalityLimiter::new(MAX_TOOL_LABELS),
        }
    }

    /// Count a tool call outcome.
    pub fn record_tool_call(&self, tool: &str, outcome: &str) {
        self.tool_calls_total
            .get_or_create(&ToolCallLabels {
                tool: self.tool_limiter.resolve(tool).to_string(),
                outcome: outcome.to_string(),
            })
            .inc();
    }

    /// Count a sanitizer verdict and observe its latency.
    pub fn record_verdict(&self, direction: &str, source: &str, label: &str, duration_ms: f64) {
        self.sanitizer_verdicts_total
            .get_or_create(&VerdictLabels {
                direction: direction.to_string(),
                source: source.to_string(),
                label: label.to_string(),
            })
            .inc();

        self.inspection_duration_ms
            .get_or_create(&SourceLabels {
                source: source.to_string(),
            })
            .observe(duration_ms);
    }

    /// Count a fallback from the model to the rule classifier.
    pub fn record_classifier_fallback(&self, reason: &str) {
        self.classifier_fallbacks_total
            .get_or_create(&FallbackLabels {
                reason: reason.to_string(),
            })
            .inc();
    }

    /// Count a target request and observe its latency.
    pub fn record_upstream_request(&self, kind: &str, status: &str, duration_ms: f64) {
        self.upstream_requests_total
            .get_or_create(&UpstreamLabels {
                kind: kind.to_string(),
                status: status.to_string(),
            })
            .inc();

        self.upstream_duration_ms
            .get_or_create(&KindLabels {
                kind: kind.to_string(),
            })
            .observe(duration_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(registry: &Registry) -> String {
        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, registry)
            .expect("encoding should succeed");
        buffer
    }

    #[test]
    fn test_metrics_registration() {
        let mut registry = Registry::default();
        let metrics = ToolWardenMetrics::new(&mut registry);

        metrics.record_tool_call("get_forecast", "admitted");
        metrics.record_verdict("request", "fallback", "benign", 0.2);
        metrics.record_classifier_fallback("unconfigured");
        metrics.record_upstream_request("buffered", "200", 12.0);
        metrics.sessions_active.set(3);

        let buffer = encode(&registry);
        assert!(buffer.contains("toolwarden_tool_calls_total"));
        assert!(buffer.contains("outcome=\"admitted\""));
        assert!(buffer.contains("toolwarden_sanitizer_verdicts_total"));
        assert!(buffer.contains("toolwarden_classifier_fallbacks_total"));
        assert!(buffer.contains("toolwarden_upstream_duration_ms_bucket"));
        assert!(buffer.contains("toolwarden_sessions_active 3"));
    }

    #[test]
    fn test_tool_label_cardinality_limited() {
        let mut registry = Registry::default();
        let metrics = ToolWardenMetrics::new(&mut registry);

        for i in 0..=MAX_TOOL_LABELS {
            metrics.record_tool_call(&format!("tool_{i}"), "admitted");
        }

        let buffer = encode(&registry);
        assert!(buffer.contains("__other__"));
    }
}
