//! Prompt-injection screening for tool-call arguments and tool results.
//!
//! [`Sanitizer::inspect`] asks the model classifier first and falls back to
//! the deterministic [`RuleClassifier`] when no model is configured, when
//! the model errors, or when it misses the inspection deadline. A model
//! answer that arrives after the deadline is dropped with its future.
//! Fallback is a degradation event: it is logged at `warn` and counted, but
//! never surfaced to the client.

mod model;
mod rules;

pub use model::{DEFAULT_THRESHOLD, HttpClassifier, HttpClassifierConfig};
pub use rules::{BENIGN_SCORE, RuleClassifier};

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};

use crate::metrics::ToolWardenMetrics;

/// Text shown to the client in place of a flagged tool result.
pub const REDACTION_NOTICE: &str = "Tool response blocked: prompt injection detected.";

/// Default model deadline.
pub const DEFAULT_INSPECTION_TIMEOUT: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictLabel {
    Benign,
    Suspicious,
}

impl VerdictLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Benign => "benign",
            Self::Suspicious => "suspicious",
        }
    }
}

/// Which classifier produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictSource {
    Model,
    Fallback,
}

impl VerdictSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Fallback => "fallback",
        }
    }
}

/// Which way the inspected text was travelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Tool-call arguments, client to target
    Request,
    /// Tool-call result, target to client
    Response,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
        }
    }
}

/// Result of inspecting one payload. Never cached across payloads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SanitizationVerdict {
    pub label: VerdictLabel,
    /// Injection confidence in `[0, 1]`
    pub score: f32,
    pub source: VerdictSource,
    /// Rule name or model label that drove a suspicious verdict
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched: Option<String>,
}

impl SanitizationVerdict {
    pub fn is_suspicious(&self) -> bool {
        self.label == VerdictLabel::Suspicious
    }

    fn from_classification(classification: Classification, source: VerdictSource) -> Self {
        Self {
            label: classification.label,
            score: classification.score.clamp(0.0, 1.0),
            source,
            matched: classification.matched,
        }
    }
}

/// Output of a [`Classifier`].
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub label: VerdictLabel,
    /// Injection confidence in `[0, 1]`
    pub score: f32,
    pub matched: Option<String>,
}

/// Errors from a classifier backend.
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier unavailable: {0}")]
    Unavailable(String),
    #[error("classifier returned HTTP {0}")]
    Status(u16),
    #[error("classifier returned malformed output: {0}")]
    Malformed(String),
}

/// A prompt-injection classification capability.
#[async_trait::async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Classification, ClassifierError>;
}

/// Sanitizer settings.
#[derive(Debug, Clone)]
pub struct SanitizerConfig {
    /// Deadline for the model classifier
    pub timeout: Duration,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_INSPECTION_TIMEOUT,
        }
    }
}

/// Model classifier with rule fallback.
pub struct Sanitizer {
    model: Option<Arc<dyn Classifier>>,
    rules: RuleClassifier,
    config: SanitizerConfig,
    metrics: Option<Arc<ToolWardenMetrics>>,
}

impl Sanitizer {
    /// # Errors
    ///
    /// Fails only if the built-in rule set does not compile.
    pub fn new(
        model: Option<Arc<dyn Classifier>>,
        config: SanitizerConfig,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            model,
            rules: RuleClassifier::new()?,
            config,
            metrics: None,
        })
    }

    /// A sanitizer that always uses the rule classifier.
    pub fn rules_only() -> Result<Self, regex::Error> {
        Self::new(None, SanitizerConfig::default())
    }

    /// Count verdicts, latencies and fallbacks.
    pub fn with_metrics(mut self, metrics: Arc<ToolWardenMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    /// Classify `text`. Always returns within the configured deadline plus
    /// the cost of the rule fallback.
    pub async fn inspect(&self, direction: Direction, text: &str) -> SanitizationVerdict {
        let started = Instant::now();
        let verdict = self.classify(text).await;

        if let Some(ref metrics) = self.metrics {
            metrics.record_verdict(
                direction.as_str(),
                verdict.source.as_str(),
                verdict.label.as_str(),
                started.elapsed().as_secs_f64() * 1000.0,
            );
        }

        if verdict.is_suspicious() {
            debug!(
                direction = direction.as_str(),
                source = verdict.source.as_str(),
                score = verdict.score,
                matched = verdict.matched.as_deref().unwrap_or(""),
                "Suspicious content"
            );
        }
        verdict
    }

    async fn classify(&self, text: &str) -> SanitizationVerdict {
        if text.trim().is_empty() {
            return SanitizationVerdict {
                label: VerdictLabel::Benign,
                score: 0.0,
                source: VerdictSource::Fallback,
                matched: None,
            };
        }

        let Some(ref model) = self.model else {
            self.count_fallback("unconfigured");
            return self.fallback(text);
        };

        match tokio::time::timeout(self.config.timeout, model.classify(text)).await {
            Ok(Ok(classification)) => {
                SanitizationVerdict::from_classification(classification, VerdictSource::Model)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Classifier failed, using rule fallback");
                self.count_fallback("error");
                self.fallback(text)
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.config.timeout.as_millis() as u64,
                    "Classifier timed out, using rule fallback"
                );
                self.count_fallback("timeout");
                self.fallback(text)
            }
        }
    }

    fn fallback(&self, text: &str) -> SanitizationVerdict {
        SanitizationVerdict::from_classification(self.rules.evaluate(text), VerdictSource::Fallback)
    }

    fn count_fallback(&self, reason: &str) {
        if let Some(ref metrics) = self.metrics {
            metrics.record_classifier_fallback(reason);
        }
    }
}

/// Neutral tool result that replaces a flagged one.
pub fn redacted_result() -> Value {
    json!({
        "content": [{ "type": "text", "text": REDACTION_NOTICE }],
        "isError": true
    })
}
