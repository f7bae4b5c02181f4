//! MCP transport sessions and their in-flight tool calls.
//!
//! A session is opened when an `initialize` exchange completes. Its id is
//! the target's `Mcp-Session-Id` when the target issues one; otherwise the
//! proxy mints one and keeps it to itself. Request ids are only unique
//! within a session, so each session tracks its own set of in-flight
//! tool-call ids.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ToolWardenError;
use crate::jsonrpc::JsonRpcId;
use crate::metrics::ToolWardenMetrics;

/// Header carrying the session id on the Streamable HTTP transport.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Prefix of every proxy-minted session id. Lets a minted id be recognised
/// after its session has been swept.
pub const MINTED_PREFIX: &str = "toolwarden-";

/// Whether the id was minted by the proxy.
pub fn is_minted(id: &str) -> bool {
    id.starts_with(MINTED_PREFIX)
}

/// Session tracking settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Sessions idle longer than this are swept
    pub idle_timeout: Duration,
    /// How often the sweeper runs
    pub sweep_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct Session {
    /// Whether the id came from the target (and so may be sent back to it)
    upstream_issued: bool,
    in_flight: HashSet<JsonRpcId>,
    last_seen: Instant,
}

/// Concurrent map of live sessions.
pub struct SessionTracker {
    sessions: DashMap<String, Session>,
    config: SessionConfig,
    metrics: Option<Arc<ToolWardenMetrics>>,
}

impl SessionTracker {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            config,
            metrics: None,
        }
    }

    /// Report the live session count in the `toolwarden_sessions_active` gauge.
    pub fn with_metrics(mut self, metrics: Arc<ToolWardenMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn update_gauge(&self) {
        if let Some(ref metrics) = self.metrics {
            metrics.sessions_active.set(self.sessions.len() as i64);
        }
    }

    /// Open (or refresh) a session under the given id.
    pub fn open(&self, id: &str, upstream_issued: bool) {
        self.sessions
            .entry(id.to_string())
            .and_modify(|s| s.last_seen = Instant::now())
            .or_insert_with(|| Session {
                upstream_issued,
                in_flight: HashSet::new(),
                last_seen: Instant::now(),
            });
        self.update_gauge();
        debug!(session_id = %id, upstream_issued, "Session opened");
    }

    /// Open a session under a fresh proxy-issued id.
    pub fn mint(&self) -> String {
        let id = format!("{MINTED_PREFIX}{}", Uuid::new_v4());
        self.open(&id, false);
        id
    }

    /// Close a session. Returns whether it existed.
    pub fn close(&self, id: &str) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            self.update_gauge();
            debug!(session_id = %id, "Session closed");
        }
        removed
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Mark activity on a session.
    pub fn touch(&self, id: &str) {
        if let Some(mut session) = self.sessions.get_mut(id) {
            session.last_seen = Instant::now();
        }
    }

    /// Whether the target issued this id. Unknown ids are the target's
    /// unless they carry the minted prefix.
    pub fn is_upstream_issued(&self, id: &str) -> bool {
        self.sessions
            .get(id)
            .map(|s| s.upstream_issued)
            .unwrap_or_else(|| !is_minted(id))
    }

    /// Whether a tool call with this id is outstanding on the session.
    pub fn is_in_flight(&self, session: Option<&str>, id: &JsonRpcId) -> bool {
        session
            .and_then(|s| self.sessions.get(s))
            .is_some_and(|s| s.in_flight.contains(id))
    }

    /// Register an outstanding tool call. The returned guard removes the id
    /// when dropped.
    ///
    /// Calls without a session, or without an id, are not tracked. A session
    /// id the proxy has never seen is adopted (the proxy may have restarted
    /// mid-session); it counts as target-issued unless it carries the minted
    /// prefix.
    ///
    /// # Errors
    ///
    /// `InvalidRequest` if the id is already in flight on the session.
    pub fn begin_call(
        self: &Arc<Self>,
        session: Option<&str>,
        id: Option<&JsonRpcId>,
    ) -> Result<InFlightGuard, ToolWardenError> {
        let (Some(session), Some(id)) = (session, id) else {
            return Ok(InFlightGuard::untracked());
        };

        let mut entry = self
            .sessions
            .entry(session.to_string())
            .or_insert_with(|| Session {
                upstream_issued: !is_minted(session),
                in_flight: HashSet::new(),
                last_seen: Instant::now(),
            });
        entry.last_seen = Instant::now();
        if !entry.in_flight.insert(id.clone()) {
            return Err(ToolWardenError::InvalidRequest {
                details: format!("request id {id} is already in flight on this session"),
            });
        }
        drop(entry);
        self.update_gauge();

        Ok(InFlightGuard {
            tracker: Some(Arc::clone(self)),
            session: session.to_string(),
            id: Some(id.clone()),
        })
    }

    fn end_call(&self, session: &str, id: &JsonRpcId) {
        if let Some(mut s) = self.sessions.get_mut(session) {
            s.in_flight.remove(id);
            s.last_seen = Instant::now();
        }
    }

    /// Remove sessions idle since before `now - idle_timeout`. Sessions with
    /// calls in flight are kept.
    pub fn sweep_idle(&self, now: Instant) -> usize {
        let idle = self.config.idle_timeout;
        let before = self.sessions.len();
        self.sessions.retain(|_, s| {
            !s.in_flight.is_empty() || now.saturating_duration_since(s.last_seen) < idle
        });
        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            self.update_gauge();
        }
        removed
    }

    /// Run [`Self::sweep_idle`] periodically until `shutdown` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, shutdown: CancellationToken) {
        let tracker = Arc::clone(self);
        let period = self.config.sweep_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // First tick completes immediately; skip it.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let removed = tracker.sweep_idle(Instant::now());
                        if removed > 0 {
                            info!(
                                removed,
                                remaining = tracker.len(),
                                "Swept idle sessions"
                            );
                        }
                    }
                    _ = shutdown.cancelled() => {
                        debug!("Session sweeper shutting down");
                        break;
                    }
                }
            }
        });
    }
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

/// RAII registration of an in-flight tool call.
#[must_use = "the call is untracked as soon as the guard is dropped"]
pub struct InFlightGuard {
    tracker: Option<Arc<SessionTracker>>,
    session: String,
    id: Option<JsonRpcId>,
}

impl InFlightGuard {
    fn untracked() -> Self {
        Self {
            tracker: None,
            session: String::new(),
            id: None,
        }
    }

    pub fn is_tracked(&self) -> bool {
        self.tracker.is_some()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let (Some(tracker), Some(id)) = (self.tracker.take(), self.id.take()) {
            tracker.end_call(&self.session, &id);
        }
    }
}
