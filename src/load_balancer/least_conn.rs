//! Least Connections load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::connections::ConnectionTracker;
use crate::load_balancer::LoadBalancer;

/// Least connections selector.
/// Selects the target with the fewest requests in flight.
#[derive(Debug)]
pub struct LeastConnections {
    tracker: Arc<ConnectionTracker>,
}

impl LeastConnections {
    pub fn new(tracker: Arc<ConnectionTracker>) -> Self {
        Self { tracker }
    }
}

impl LoadBalancer for LeastConnections {
    fn next_target<'a>(&self, candidates: &'a [String]) -> Option<&'a str> {
        // In case of tie, the first one is selected (stability)
        candidates
            .iter()
            .min_by_key(|t| self.tracker.in_flight(t))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_least_conn() {
        let tracker = Arc::new(ConnectionTracker::new());
        let lb = LeastConnections::new(tracker.clone());
        let targets = vec!["http://a".to_string(), "http://b".to_string()];

        let _a = tracker.acquire("http://a");
        assert_eq!(lb.next_target(&targets), Some("http://b"));

        let _b1 = tracker.acquire("http://b");
        let _b2 = tracker.acquire("http://b");
        assert_eq!(lb.next_target(&targets), Some("http://a"));
    }
}
