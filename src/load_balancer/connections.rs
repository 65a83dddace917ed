//! In-flight request tracking per target.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

/// Counts requests currently in flight to each target URL.
#[derive(Debug, Default)]
pub struct ConnectionTracker {
    in_flight: DashMap<String, Arc<AtomicUsize>>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a request to `target` until the returned guard is dropped.
    pub fn acquire(&self, target: &str) -> ConnectionGuard {
        let counter = match self.in_flight.get(target) {
            Some(counter) => counter.clone(),
            None => self
                .in_flight
                .entry(target.to_string())
                .or_insert_with(|| Arc::new(AtomicUsize::new(0)))
                .clone(),
        };
        counter.fetch_add(1, Ordering::Relaxed);
        ConnectionGuard { counter }
    }

    pub fn in_flight(&self, target: &str) -> usize {
        self.in_flight
            .get(target)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }
}

/// A RAII guard that releases one in-flight slot on drop.
#[derive(Debug)]
pub struct ConnectionGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_releases() {
        let tracker = ConnectionTracker::new();
        let first = tracker.acquire("http://a");
        let second = tracker.acquire("http://a");
        assert_eq!(tracker.in_flight("http://a"), 2);
        assert_eq!(tracker.in_flight("http://b"), 0);

        drop(first);
        assert_eq!(tracker.in_flight("http://a"), 1);
        drop(second);
        assert_eq!(tracker.in_flight("http://a"), 0);
    }
}
