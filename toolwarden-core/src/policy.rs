//! Admission pipeline for intercepted tool calls.
//!
//! ```text
//! received ─► enabled? ──no──► [denied: disabled]
//!                │yes
//!                ▼
//!           rate limit ──exhausted──► [denied: rate-limited]
//!                │admitted
//!                ▼
//!      inspect(arguments) ──suspicious──► [denied: sanitized]
//!                │benign
//!                ▼
//!           [admitted]
//! ```
//!
//! The first two checks run as one atomic registry step. Inspection runs
//! after the registry lock is released. Every terminal state records exactly
//! one outcome.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::error::ToolWardenError;
use crate::interceptor::ToolCall;
use crate::metrics::ToolWardenMetrics;
use crate::rate_limiter::retry_after_secs;
use crate::registry::{Admission, CallOutcome, ToolRegistry};
use crate::sanitizer::{Direction, SanitizationVerdict, Sanitizer};

/// Why a call was denied.
#[derive(Debug, Clone, PartialEq)]
pub enum DenialReason {
    Disabled,
    RateLimited { retry_after: Duration },
    Sanitized { verdict: SanitizationVerdict },
}

impl DenialReason {
    pub fn outcome(&self) -> CallOutcome {
        match self {
            Self::Disabled => CallOutcome::BlockedDisabled,
            Self::RateLimited { .. } => CallOutcome::BlockedRateLimited,
            Self::Sanitized { .. } => CallOutcome::BlockedSanitization,
        }
    }

    /// The client-facing error for this denial.
    pub fn into_error(self, tool: &str) -> ToolWardenError {
        let tool = tool.to_string();
        match self {
            Self::Disabled => ToolWardenError::ToolDisabled { tool },
            Self::RateLimited { retry_after } => ToolWardenError::RateLimited {
                tool,
                retry_after_secs: Some(retry_after_secs(retry_after)),
            },
            Self::Sanitized { .. } => ToolWardenError::SanitizationBlocked { tool },
        }
    }
}

/// Terminal state of the admission pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyDecision {
    Admitted { verdict: SanitizationVerdict },
    Denied(DenialReason),
}

impl PolicyDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted { .. })
    }
}

/// Runs the admission pipeline and owns outcome accounting.
pub struct PolicyEngine {
    registry: Arc<ToolRegistry>,
    sanitizer: Arc<Sanitizer>,
    metrics: Option<Arc<ToolWardenMetrics>>,
}

impl PolicyEngine {
    pub fn new(registry: Arc<ToolRegistry>, sanitizer: Arc<Sanitizer>) -> Self {
        Self {
            registry,
            sanitizer,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<ToolWardenMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn sanitizer(&self) -> &Arc<Sanitizer> {
        &self.sanitizer
    }

    /// Decide whether `call` may reach the target.
    pub async fn evaluate(&self, call: &ToolCall) -> PolicyDecision {
        self.evaluate_at(call, Instant::now()).await
    }

    /// [`Self::evaluate`] with an explicit clock reading for the rate limiter.
    pub async fn evaluate_at(&self, call: &ToolCall, now: Instant) -> PolicyDecision {
        let decision = match self.registry.admit_at(&call.name, now) {
            Admission::Disabled => PolicyDecision::Denied(DenialReason::Disabled),
            Admission::RateLimited { retry_after } => {
                PolicyDecision::Denied(DenialReason::RateLimited { retry_after })
            }
            Admission::Admitted => {
                let verdict = self
                    .sanitizer
                    .inspect(Direction::Request, &call.argument_text())
                    .await;
                if verdict.is_suspicious() {
                    PolicyDecision::Denied(DenialReason::Sanitized { verdict })
                } else {
                    PolicyDecision::Admitted { verdict }
                }
            }
        };

        match &decision {
            PolicyDecision::Admitted { .. } => {
                self.record_outcome(&call.name, CallOutcome::Admitted);
                info!(tool = %call.name, request_id = ?call.id, "Tool call admitted");
            }
            PolicyDecision::Denied(reason) => {
                self.record_outcome(&call.name, reason.outcome());
                match reason {
                    DenialReason::Sanitized { verdict } => warn!(
                        tool = %call.name,
                        request_id = ?call.id,
                        source = verdict.source.as_str(),
                        score = verdict.score,
                        matched = verdict.matched.as_deref().unwrap_or(""),
                        "Tool call blocked by content inspection"
                    ),
                    other => info!(
                        tool = %call.name,
                        request_id = ?call.id,
                        outcome = other.outcome().as_str(),
                        "Tool call denied"
                    ),
                }
            }
        }

        decision
    }

    /// Count an outcome in the registry and in metrics.
    pub fn record_outcome(&self, tool: &str, outcome: CallOutcome) {
        self.registry.record_call(tool, outcome);
        if let Some(ref metrics) = self.metrics {
            metrics.record_tool_call(tool, outcome.as_str());
        }
    }
}
