//! Per-service dispatch state.
//!
//! # Responsibilities
//! - Hold the load balancer instance of one service
//! - Resolve breaker names and settings for the service's targets

use std::sync::Arc;

use crate::config::{BreakerScope, CircuitBreakerConfig, LoadBalancing, ServiceConfig};
use crate::load_balancer::{
    connections::ConnectionTracker, least_conn::LeastConnections, random::Random,
    round_robin::RoundRobin, weighted::Weighted, LoadBalancer,
};
use crate::resilience::Settings;

#[derive(Debug)]
pub struct ServicePool {
    pub service: Arc<ServiceConfig>,
    balancer: Box<dyn LoadBalancer>,
    breaker_settings: Settings,
}

impl ServicePool {
    pub fn new(
        service: Arc<ServiceConfig>,
        default_breaker: &CircuitBreakerConfig,
        tracker: Arc<ConnectionTracker>,
    ) -> Self {
        let balancer: Box<dyn LoadBalancer> = match service.load_balancing {
            LoadBalancing::RoundRobin => Box::new(RoundRobin::new()),
            LoadBalancing::Random => Box::new(Random),
            LoadBalancing::Weighted => Box::new(Weighted::new(service.weights.clone())),
            LoadBalancing::LeastConnections => Box::new(LeastConnections::new(tracker)),
        };

        let breaker_config = service.circuit_breaker.as_ref().unwrap_or(default_breaker);

        Self {
            breaker_settings: Settings::from(breaker_config),
            service,
            balancer,
        }
    }

    pub fn pick<'a>(&self, candidates: &'a [String]) -> Option<&'a str> {
        self.balancer.next_target(candidates)
    }

    /// Breaker guarding calls from this service to `target`.
    pub fn breaker_name(&self, target: &str) -> String {
        match self.service.breaker_scope {
            BreakerScope::Service => self.service.name.clone(),
            BreakerScope::Target => format!("{}@{}", self.service.name, target),
        }
    }

    pub fn breaker_settings(&self) -> &Settings {
        &self.breaker_settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breaker_names() {
        let tracker = Arc::new(ConnectionTracker::new());
        let mut service = ServiceConfig::new("orders", vec!["http://a".to_string()]);

        let pool = ServicePool::new(Arc::new(service.clone()), &CircuitBreakerConfig::default(), tracker.clone());
        assert_eq!(pool.breaker_name("http://a"), "orders@http://a");

        service.breaker_scope = BreakerScope::Service;
        let pool = ServicePool::new(Arc::new(service), &CircuitBreakerConfig::default(), tracker);
        assert_eq!(pool.breaker_name("http://a"), "orders");
    }

    #[test]
    fn test_service_breaker_overrides_default() {
        let mut service = ServiceConfig::new("orders", vec!["http://a".to_string()]);
        service.circuit_breaker = Some(CircuitBreakerConfig {
            min_requests: 2,
            ..Default::default()
        });

        let pool = ServicePool::new(
            Arc::new(service),
            &CircuitBreakerConfig::default(),
            Arc::new(ConnectionTracker::new()),
        );
        assert_eq!(pool.breaker_settings().min_requests, 2);
    }
}
