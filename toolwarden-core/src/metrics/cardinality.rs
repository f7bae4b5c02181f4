//! Bounded label values for per-tool metric families.

use std::collections::HashSet;

use parking_lot::Mutex;

/// Label value used once the limit is reached.
pub const OVERFLOW_LABEL: &str = "__other__";

/// Caps the number of distinct values a metric label may take.
///
/// Tool names come from client traffic, so an unbounded label would let a
/// client create arbitrarily many time series. Past `max_values`, unseen
/// values are reported as [`OVERFLOW_LABEL`].
pub struct CardinalityLimiter {
    known: Mutex<HashSet<String>>,
    max_values: usize,
}

impl CardinalityLimiter {
    pub fn new(max_values: usize) -> Self {
        Self {
            known: Mutex::new(HashSet::new()),
            max_values,
        }
    }

    /// Resolve a label value, returning [`OVERFLOW_LABEL`] past the limit.
    pub fn resolve<'a>(&self, value: &'a str) -> &'a str {
        let mut known = self.known.lock();
        if known.contains(value) {
            value
        } else if known.len() < self.max_values {
            known.insert(value.to_string());
            value
        } else {
            OVERFLOW_LABEL
        }
    }

    /// Number of distinct values admitted so far.
    pub fn len(&self) -> usize {
        self.known.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limiter_overflows_after_max() {
        let limiter = CardinalityLimiter::new(2);
        assert_eq!(limiter.resolve("get_forecast"), "get_forecast");
        assert_eq!(limiter.resolve("get_alerts"), "get_alerts");
        assert_eq!(limiter.resolve("delete_everything"), OVERFLOW_LABEL);
        assert_eq!(limiter.len(), 2);
    }

    #[test]
    fn test_limiter_remembers_known_values() {
        let limiter = CardinalityLimiter::new(1);
        assert!(limiter.is_empty());
        assert_eq!(limiter.resolve("a"), "a");
        assert_eq!(limiter.resolve("b"), OVERFLOW_LABEL);
        assert_eq!(limiter.resolve("a"), "a");
    }
}
