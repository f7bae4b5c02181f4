//! Fixed-window call counting for a single tool.
//!
//! A [`RateWindow`] is owned by its tool's registry record and is only ever
//! touched while that record's entry lock is held, which makes
//! [`RateWindow::try_acquire`] the atomic check-and-increment step.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Default window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Result of an admission attempt against a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// The call was counted.
    Admitted,
    /// The window's quota is spent.
    Limited {
        /// Time until the current window rolls over
        retry_after: Duration,
    },
}

/// Call counter for one fixed window.
#[derive(Debug, Clone, Default)]
pub struct RateWindow {
    started: Option<Instant>,
    started_at: Option<DateTime<Utc>>,
    count: u32,
}

impl RateWindow {
    /// Calls counted in the current window.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Wall-clock start of the current window, `None` before the first call.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Count a call if the window has quota left.
    ///
    /// Starts a fresh window when none exists or the current one is at least
    /// `window` old. A `limit` of 0 never admits.
    pub fn try_acquire(&mut self, limit: u32, now: Instant, window: Duration) -> RateDecision {
        let expired = match self.started {
            None => true,
            Some(started) => now.saturating_duration_since(started) >= window,
        };
        if expired {
            self.started = Some(now);
            self.started_at = Some(Utc::now());
            self.count = 0;
        }

        if self.count < limit {
            self.count += 1;
            return RateDecision::Admitted;
        }

        let elapsed = self
            .started
            .map(|s| now.saturating_duration_since(s))
            .unwrap_or_default();
        RateDecision::Limited {
            retry_after: window.saturating_sub(elapsed),
        }
    }
}

/// Round a retry delay up to whole seconds, never below one.
pub fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    secs.max(1)
}
