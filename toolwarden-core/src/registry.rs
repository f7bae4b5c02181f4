//! Tool registry: enablement, rate-limit configuration and usage statistics.
//!
//! The registry exclusively owns every tool record. Tools are discovered
//! lazily, either from traffic or from a `tools/list` response, and start
//! enabled with the default rate limit. All mutation goes through the
//! methods below; each one holds the tool's map entry lock for its whole
//! read-modify-write, so [`ToolRegistry::admit_at`] is the single atomic
//! check-and-increment for a tool.
//!
//! Discovery from traffic stops at [`RegistryConfig::max_tools`]. Past that,
//! calls to unseen names are refused as disabled and leave no record.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, warn};

use crate::metrics::ToolWardenMetrics;
use crate::rate_limiter::{DEFAULT_WINDOW, RateDecision, RateWindow};

/// Calls per window for tools without an explicit limit.
pub const DEFAULT_RATE_LIMIT: u32 = 60;

/// Tools the registry will learn from traffic before refusing new names.
pub const DEFAULT_MAX_TOOLS: usize = 1024;

/// Registry-wide defaults.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Limit applied to newly discovered tools
    pub default_rate_limit: u32,
    /// Rate-limit window length
    pub window: Duration,
    /// Cap on tools discovered from traffic. Operator registrations are exempt.
    pub max_tools: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            default_rate_limit: DEFAULT_RATE_LIMIT,
            window: DEFAULT_WINDOW,
            max_tools: DEFAULT_MAX_TOOLS,
        }
    }
}

/// Outcome of a tool call, as counted in [`ToolStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallOutcome {
    Admitted,
    BlockedDisabled,
    BlockedRateLimited,
    BlockedSanitization,
    /// The call was admitted but the target could not be reached or
    /// answered with something other than an MCP response.
    ForwardingFailure,
    /// The call was admitted but its result was replaced after outbound
    /// inspection.
    Redacted,
}

impl CallOutcome {
    /// Name used by the stats endpoint and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admitted => "admitted",
            Self::BlockedDisabled => "blocked-disabled",
            Self::BlockedRateLimited => "blocked-rate-limited",
            Self::BlockedSanitization => "blocked-sanitization",
            Self::ForwardingFailure => "forwarding-failure",
            Self::Redacted => "redacted",
        }
    }
}

/// Per-tool outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ToolStats {
    pub admitted: u64,
    pub blocked_disabled: u64,
    pub blocked_rate_limited: u64,
    pub blocked_sanitization: u64,
    pub forwarding_failure: u64,
    pub redacted: u64,
}

impl ToolStats {
    fn record(&mut self, outcome: CallOutcome) {
        let counter = match outcome {
            CallOutcome::Admitted => &mut self.admitted,
            CallOutcome::BlockedDisabled => &mut self.blocked_disabled,
            CallOutcome::BlockedRateLimited => &mut self.blocked_rate_limited,
            CallOutcome::BlockedSanitization => &mut self.blocked_sanitization,
            CallOutcome::ForwardingFailure => &mut self.forwarding_failure,
            CallOutcome::Redacted => &mut self.redacted,
        };
        *counter += 1;
    }

    /// Calls denied by any policy stage.
    pub fn blocked(&self) -> u64 {
        self.blocked_disabled + self.blocked_rate_limited + self.blocked_sanitization
    }

    fn accumulate(&mut self, other: &ToolStats) {
        self.admitted += other.admitted;
        self.blocked_disabled += other.blocked_disabled;
        self.blocked_rate_limited += other.blocked_rate_limited;
        self.blocked_sanitization += other.blocked_sanitization;
        self.forwarding_failure += other.forwarding_failure;
        self.redacted += other.redacted;
    }
}

/// Point-in-time view of one tool, as served by `GET /api/tools`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,
    pub enabled: bool,
    pub rate_limit_per_minute: u32,
    /// Calls counted in the current rate-limit window
    pub call_count: u32,
    pub last_window_start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Aggregate statistics, as served by `GET /api/stats`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub tools: BTreeMap<String, ToolStats>,
    pub total_tools: usize,
    pub enabled_tools: usize,
    pub disabled_tools: usize,
    pub totals: ToolStats,
}

/// Result of the enablement and rate-limit checks for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Disabled,
    RateLimited { retry_after: Duration },
}

#[derive(Debug)]
struct ToolRecord {
    enabled: bool,
    rate_limit: u32,
    window: RateWindow,
    stats: ToolStats,
    description: Option<String>,
}

impl ToolRecord {
    fn new(config: &RegistryConfig) -> Self {
        Self {
            enabled: true,
            rate_limit: config.default_rate_limit,
            window: RateWindow::default(),
            stats: ToolStats::default(),
            description: None,
        }
    }

    fn snapshot(&self, name: &str) -> Tool {
        Tool {
            name: name.to_string(),
            enabled: self.enabled,
            rate_limit_per_minute: self.rate_limit,
            call_count: self.window.count(),
            last_window_start: self.window.started_at(),
            description: self.description.clone(),
        }
    }
}

/// Authoritative store of tool state, shared via `Arc`.
pub struct ToolRegistry {
    tools: DashMap<String, ToolRecord>,
    config: RegistryConfig,
    metrics: Option<Arc<ToolWardenMetrics>>,
}

impl ToolRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            tools: DashMap::new(),
            config,
            metrics: None,
        }
    }

    /// Track the number of known tools in the `toolwarden_tools_registered` gauge.
    pub fn with_metrics(mut self, metrics: Arc<ToolWardenMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Run `f` on the tool's record, creating it first if unseen.
    fn with_record<R>(&self, name: &str, f: impl FnOnce(&mut ToolRecord) -> R) -> R {
        if let Some(mut record) = self.tools.get_mut(name) {
            return f(&mut record);
        }
        self.create_then(name, f)
    }

    /// [`Self::with_record`] for names seen in traffic: `None` once the
    /// registry is full and the name is unseen.
    fn with_discovered<R>(&self, name: &str, f: impl FnOnce(&mut ToolRecord) -> R) -> Option<R> {
        if let Some(mut record) = self.tools.get_mut(name) {
            return Some(f(&mut record));
        }
        // Checked outside the entry lock: `len` locks every shard. Concurrent
        // discoveries may overshoot the cap by a few names.
        if self.tools.len() >= self.config.max_tools {
            warn!(
                tool = %name,
                max_tools = self.config.max_tools,
                "Tool registry full, not registering"
            );
            return None;
        }
        Some(self.create_then(name, f))
    }

    fn create_then<R>(&self, name: &str, f: impl FnOnce(&mut ToolRecord) -> R) -> R {
        let mut created = false;
        let mut record = self.tools.entry(name.to_string()).or_insert_with(|| {
            created = true;
            ToolRecord::new(&self.config)
        });
        if created {
            debug!(tool = %name, "Discovered tool");
            if let Some(ref metrics) = self.metrics {
                metrics.tools_registered.inc();
            }
        }
        f(&mut record)
    }

    /// Current state of a tool, registering it with defaults if unseen.
    pub fn get_tool(&self, name: &str) -> Tool {
        self.with_record(name, |record| record.snapshot(name))
    }

    /// Current state of a known tool.
    pub fn lookup(&self, name: &str) -> Option<Tool> {
        self.tools.get(name).map(|record| record.snapshot(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Register a tool seen in a `tools/list` response. Existing state is
    /// kept; the description is refreshed when one is given.
    pub fn discover(&self, name: &str, description: Option<&str>) {
        self.with_discovered(name, |record| {
            if let Some(description) = description {
                record.description = Some(description.to_string());
            }
        });
    }

    /// Set the enabled flag. Idempotent; registers the tool if unseen.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Tool {
        self.with_record(name, |record| {
            record.enabled = enabled;
            record.snapshot(name)
        })
    }

    /// Flip (or, with `Some`, set) the enabled flag of a known tool.
    ///
    /// Returns `None` without registering anything when the tool is unknown.
    pub fn toggle_enabled(&self, name: &str, enabled: Option<bool>) -> Option<Tool> {
        let mut record = self.tools.get_mut(name)?;
        record.enabled = enabled.unwrap_or(!record.enabled);
        Some(record.snapshot(name))
    }

    /// Set the per-window limit, registering the tool if unseen.
    ///
    /// Calls already counted in the current window stay counted; a limit
    /// below the consumed count denies the rest of the window.
    pub fn set_rate_limit(&self, name: &str, per_minute: u32) -> Tool {
        self.with_record(name, |record| {
            record.rate_limit = per_minute;
            record.snapshot(name)
        })
    }

    /// Set the per-window limit of a known tool; `None` if unknown.
    pub fn update_rate_limit(&self, name: &str, per_minute: u32) -> Option<Tool> {
        let mut record = self.tools.get_mut(name)?;
        record.rate_limit = per_minute;
        Some(record.snapshot(name))
    }

    /// Enablement check plus rate-limit check-and-increment, as one atomic
    /// step under the tool's entry lock.
    pub fn admit(&self, name: &str) -> Admission {
        self.admit_at(name, Instant::now())
    }

    /// [`Self::admit`] with an explicit clock reading.
    pub fn admit_at(&self, name: &str, now: Instant) -> Admission {
        let window = self.config.window;
        self.with_discovered(name, |record| {
            if !record.enabled {
                return Admission::Disabled;
            }
            match record.window.try_acquire(record.rate_limit, now, window) {
                RateDecision::Admitted => Admission::Admitted,
                RateDecision::Limited { retry_after } => Admission::RateLimited { retry_after },
            }
        })
        .unwrap_or(Admission::Disabled)
    }

    /// Count a call outcome against the tool. Dropped for unseen names
    /// once the registry is full.
    pub fn record_call(&self, name: &str, outcome: CallOutcome) {
        self.with_discovered(name, |record| record.stats.record(outcome));
    }

    /// Outcome counters of one tool.
    pub fn tool_stats(&self, name: &str) -> Option<ToolStats> {
        self.tools.get(name).map(|record| record.stats)
    }

    /// Every known tool, sorted by name.
    pub fn snapshot(&self) -> Vec<Tool> {
        let mut tools: Vec<Tool> = self
            .tools
            .iter()
            .map(|entry| entry.value().snapshot(entry.key()))
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Per-tool counters plus registry-wide totals.
    pub fn stats(&self) -> RegistryStats {
        let mut tools = BTreeMap::new();
        let mut totals = ToolStats::default();
        let mut enabled_tools = 0;

        for entry in self.tools.iter() {
            let record = entry.value();
            if record.enabled {
                enabled_tools += 1;
            }
            totals.accumulate(&record.stats);
            tools.insert(entry.key().clone(), record.stats);
        }

        let total_tools = tools.len();
        RegistryStats {
            tools,
            total_tools,
            enabled_tools,
            disabled_tools: total_tools - enabled_tools,
            totals,
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_limit(limit: u32) -> ToolRegistry {
        ToolRegistry::new(RegistryConfig {
            default_rate_limit: limit,
            ..RegistryConfig::default()
        })
    }

    #[test]
    fn test_get_tool_registers_defaults() {
        let registry = ToolRegistry::default();
        assert!(registry.lookup("get_forecast").is_none());

        let tool = registry.get_tool("get_forecast");
        assert!(tool.enabled);
        assert_eq!(tool.rate_limit_per_minute, DEFAULT_RATE_LIMIT);
        assert_eq!(tool.call_count, 0);
        assert!(tool.last_window_start.is_none());
        assert!(registry.contains("get_forecast"));
    }

    #[test]
    fn test_set_enabled_is_idempotent_and_leaves_stats_alone() {
        let registry = ToolRegistry::default();
        for _ in 0..3 {
            let tool = registry.set_enabled("get_alerts", true);
            assert!(tool.enabled);
        }
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.tool_stats("get_alerts"), Some(ToolStats::default()));
    }

    #[test]
    fn test_toggle_requires_known_tool() {
        let registry = ToolRegistry::default();
        assert!(registry.toggle_enabled("ghost", None).is_none());
        assert!(registry.is_empty());

        registry.get_tool("get_alerts");
        assert!(!registry.toggle_enabled("get_alerts", None).unwrap().enabled);
        assert!(registry.toggle_enabled("get_alerts", None).unwrap().enabled);
        assert!(!registry.toggle_enabled("get_alerts", Some(false)).unwrap().enabled);
        assert!(!registry.toggle_enabled("get_alerts", Some(false)).unwrap().enabled);
    }

    #[test]
    fn test_admit_disabled_tool() {
        let registry = ToolRegistry::default();
        registry.set_enabled("get_alerts", false);
        assert_eq!(registry.admit("get_alerts"), Admission::Disabled);
        assert_eq!(registry.get_tool("get_alerts").call_count, 0);
    }

    #[test]
    fn test_traffic_discovery_stops_at_capacity() {
        let registry = ToolRegistry::new(RegistryConfig {
            max_tools: 2,
            ..RegistryConfig::default()
        });
        registry.discover("get_forecast", None);
        assert_eq!(registry.admit("get_alerts"), Admission::Admitted);
        registry.record_call("get_alerts", CallOutcome::Admitted);
        assert_eq!(registry.len(), 2);

        for i in 0..10 {
            let name = format!("random_{i}");
            assert_eq!(registry.admit(&name), Admission::Disabled);
            registry.record_call(&name, CallOutcome::BlockedDisabled);
            registry.discover(&name, Some("spoofed"));
        }
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.stats().total_tools, 2);
        assert!(registry.lookup("random_0").is_none());

        // Known tools keep working at capacity.
        assert_eq!(registry.admit("get_forecast"), Admission::Admitted);
        assert_eq!(registry.tool_stats("get_alerts").unwrap().admitted, 1);

        // Operator registrations are not capped.
        registry.set_enabled("maintenance", false);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_admit_enforces_limit() {
        let registry = registry_with_limit(3);
        let now = Instant::now();
        let decisions: Vec<Admission> = (0..10).map(|_| registry.admit_at("t", now)).collect();

        let admitted = decisions
            .iter()
            .filter(|d| **d == Admission::Admitted)
            .count();
        assert_eq!(admitted, 3);
        assert!(matches!(decisions[3], Admission::RateLimited { .. }));
        assert_eq!(registry.get_tool("t").call_count, 3);
    }

    #[test]
    fn test_window_rollover_readmits_exhausted_tool() {
        let registry = registry_with_limit(2);
        let start = Instant::now();
        registry.admit_at("t", start);
        registry.admit_at("t", start);
        assert!(matches!(
            registry.admit_at("t", start + Duration::from_secs(30)),
            Admission::RateLimited { .. }
        ));

        let after = start + DEFAULT_WINDOW + Duration::from_millis(1);
        assert_eq!(registry.admit_at("t", after), Admission::Admitted);
        assert_eq!(registry.get_tool("t").call_count, 1);
    }

    #[test]
    fn test_zero_limit_blocks_enabled_tool() {
        let registry = ToolRegistry::default();
        registry.set_rate_limit("t", 0);
        assert!(matches!(registry.admit("t"), Admission::RateLimited { .. }));
    }

    #[test]
    fn test_rate_limit_change_applies_to_next_check() {
        let registry = registry_with_limit(1);
        let now = Instant::now();
        assert_eq!(registry.admit_at("t", now), Admission::Admitted);
        assert!(matches!(registry.admit_at("t", now), Admission::RateLimited { .. }));

        registry.update_rate_limit("t", 5).unwrap();
        assert_eq!(registry.admit_at("t", now), Admission::Admitted);
        assert_eq!(registry.get_tool("t").call_count, 2);

        assert!(registry.update_rate_limit("ghost", 5).is_none());
        assert!(!registry.contains("ghost"));
    }

    #[test]
    fn test_concurrent_admission_is_atomic() {
        const LIMIT: u32 = 25;
        let registry = Arc::new(registry_with_limit(LIMIT));
        let now = Instant::now();

        let admitted: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..=LIMIT)
                .map(|_| {
                    let registry = Arc::clone(&registry);
                    scope.spawn(move || registry.admit_at("shared", now) == Admission::Admitted)
                })
                .collect();
            handles
                .into_iter()
                .map(|h| usize::from(h.join().unwrap()))
                .sum()
        });

        assert_eq!(admitted, LIMIT as usize);
        assert_eq!(registry.get_tool("shared").call_count, LIMIT);
    }

    #[test]
    fn test_discover_keeps_state_and_sets_description() {
        let registry = ToolRegistry::default();
        registry.set_enabled("get_alerts", false);
        registry.discover("get_alerts", Some("Get weather alerts for a US state."));
        registry.discover("get_forecast", None);

        let tools = registry.snapshot();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name, "get_alerts");
        assert!(!tools[0].enabled);
        assert_eq!(
            tools[0].description.as_deref(),
            Some("Get weather alerts for a US state.")
        );
        assert_eq!(tools[1].name, "get_forecast");
    }

    #[test]
    fn test_stats_aggregate() {
        let registry = ToolRegistry::default();
        registry.record_call("a", CallOutcome::Admitted);
        registry.record_call("a", CallOutcome::ForwardingFailure);
        registry.record_call("b", CallOutcome::BlockedDisabled);
        registry.record_call("b", CallOutcome::BlockedSanitization);
        registry.set_enabled("b", false);

        let stats = registry.stats();
        assert_eq!(stats.total_tools, 2);
        assert_eq!(stats.enabled_tools, 1);
        assert_eq!(stats.disabled_tools, 1);
        assert_eq!(stats.tools["a"].admitted, 1);
        assert_eq!(stats.tools["a"].forwarding_failure, 1);
        assert_eq!(stats.tools["b"].blocked(), 2);
        assert_eq!(stats.totals.admitted, 1);
        assert_eq!(stats.totals.blocked(), 2);
    }

    #[test]
    fn test_wire_field_names() {
        let registry = ToolRegistry::default();
        registry.admit("get_forecast");
        registry.record_call("get_forecast", CallOutcome::BlockedRateLimited);

        let tool = serde_json::to_value(registry.get_tool("get_forecast")).unwrap();
        assert_eq!(tool["rateLimitPerMinute"], 60);
        assert_eq!(tool["callCount"], 1);
        assert!(tool["lastWindowStart"].is_string());
        assert!(tool.get("description").is_none());

        let stats = serde_json::to_value(registry.stats()).unwrap();
        assert_eq!(stats["tools"]["get_forecast"]["blocked-rate-limited"], 1);
        assert_eq!(stats["totalTools"], 1);
        assert_eq!(stats["totals"]["forwarding-failure"], 0);
    }
}
