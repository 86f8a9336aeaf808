//! Keyed log throttling for per-packet diagnostics.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Gate that lets a keyed message through at most once per interval, or once ever.
///
/// ```ignore
/// if throttle.every("no_input_buf", Duration::from_secs(2)) {
///     info!("no input buffer available");
/// }
/// ```
#[derive(Default)]
pub struct LogThrottle {
    last_at: Mutex<HashMap<String, Instant>>,
    seen: Mutex<HashSet<String>>,
}

impl LogThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `key` has not passed within the last `interval`
    pub fn every(&self, key: &str, interval: Duration) -> bool {
        let now = Instant::now();
        let mut last_at = self.last_at.lock();
        match last_at.get_mut(key) {
            Some(prev) if now.duration_since(*prev) < interval => false,
            Some(prev) => {
                *prev = now;
                true
            }
            None => {
                last_at.insert(key.to_string(), now);
                true
            }
        }
    }

    /// True the first time `key` is seen
    pub fn once(&self, key: &str) -> bool {
        let mut seen = self.seen.lock();
        if seen.contains(key) {
            false
        } else {
            seen.insert(key.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_suppresses_within_interval() {
        let throttle = LogThrottle::new();
        assert!(throttle.every("rx", Duration::from_secs(60)));
        assert!(!throttle.every("rx", Duration::from_secs(60)));
        assert!(throttle.every("other", Duration::from_secs(60)));
    }

    #[test]
    fn every_with_zero_interval_always_passes() {
        let throttle = LogThrottle::new();
        assert!(throttle.every("k", Duration::ZERO));
        assert!(throttle.every("k", Duration::ZERO));
    }

    #[test]
    fn once_passes_a_single_time() {
        let throttle = LogThrottle::new();
        assert!(throttle.once("surface_invalid"));
        assert!(!throttle.once("surface_invalid"));
    }
}
