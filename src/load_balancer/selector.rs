//! Target selection and breaker-guarded dispatch.
//!
//! # Selection
//! ```text
//! canary router      → primary or canary candidates
//! exclude list       → drop targets already tried     (fail open)
//! health checker     → drop unhealthy targets          (fail open)
//! breaker registry   → drop targets whose breaker is open (fail open)
//! service balancer   → one target
//! ```
//! Each filter keeps the previous list when it would leave nothing, so a
//! service with every target down still gets a chance to answer, and an open
//! breaker rejects the call rather than the selector.

use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;

use crate::config::{CircuitBreakerConfig, ServiceConfig};
use crate::health::{TargetChecker, TargetHealth};
use crate::load_balancer::connections::ConnectionTracker;
use crate::load_balancer::pool::ServicePool;
use crate::observability::metrics;
use crate::resilience::{BreakerError, BreakerManager, CircuitBreaker, State};
use crate::routing::{CanaryRouter, RequestInfo};

/// Errors from [`TargetSelector::dispatch`].
#[derive(Debug, thiserror::Error)]
pub enum DispatchError<E = Infallible> {
    #[error("unknown service {0}")]
    UnknownService(String),

    #[error("service {0} has no targets")]
    NoTargets(String),

    #[error("circuit breaker open for {target}")]
    CircuitOpen { target: String },

    #[error("too many trial requests for {target}")]
    TooManyRequests { target: String },

    #[error("upstream {target} failed: {error}")]
    Upstream { target: String, error: E },
}

impl<E> DispatchError<E> {
    /// True when the breaker turned the call away before it reached the target.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            DispatchError::CircuitOpen { .. } | DispatchError::TooManyRequests { .. }
        )
    }

    /// Target the failed call was routed to, if one was chosen.
    pub fn target(&self) -> Option<&str> {
        match self {
            DispatchError::CircuitOpen { target }
            | DispatchError::TooManyRequests { target }
            | DispatchError::Upstream { target, .. } => Some(target),
            _ => None,
        }
    }
}

impl DispatchError<Infallible> {
    fn widen<E>(self) -> DispatchError<E> {
        match self {
            DispatchError::UnknownService(s) => DispatchError::UnknownService(s),
            DispatchError::NoTargets(s) => DispatchError::NoTargets(s),
            DispatchError::CircuitOpen { target } => DispatchError::CircuitOpen { target },
            DispatchError::TooManyRequests { target } => DispatchError::TooManyRequests { target },
            DispatchError::Upstream { error, .. } => match error {},
        }
    }
}

/// The target chosen for one attempt.
#[derive(Debug, Clone)]
pub struct Selection {
    pub service: Arc<ServiceConfig>,
    pub target: String,
    pub canary: bool,
    pub breaker: Arc<CircuitBreaker>,
}

/// A successful dispatch: the target used and the call's value.
#[derive(Debug)]
pub struct Dispatched<T> {
    pub target: String,
    pub canary: bool,
    pub value: T,
}

/// Chooses a target per request and runs the upstream call through its breaker.
pub struct TargetSelector {
    canary: CanaryRouter,
    checker: Arc<TargetChecker>,
    breakers: Arc<BreakerManager>,
    connections: Arc<ConnectionTracker>,
    default_breaker: CircuitBreakerConfig,
    pools: DashMap<String, Arc<ServicePool>>,
}

impl TargetSelector {
    pub fn new(
        checker: Arc<TargetChecker>,
        breakers: Arc<BreakerManager>,
        default_breaker: CircuitBreakerConfig,
    ) -> Self {
        Self {
            canary: CanaryRouter::new(),
            checker,
            breakers,
            connections: Arc::new(ConnectionTracker::new()),
            default_breaker,
            pools: DashMap::new(),
        }
    }

    pub fn checker(&self) -> &Arc<TargetChecker> {
        &self.checker
    }

    pub fn breakers(&self) -> &Arc<BreakerManager> {
        &self.breakers
    }

    pub fn connections(&self) -> &Arc<ConnectionTracker> {
        &self.connections
    }

    /// Replace the service table. Unchanged services keep their balancer state.
    /// Monitored targets follow the services with health checking enabled.
    pub fn sync_services(&self, services: &[ServiceConfig]) {
        let names: HashSet<&str> = services.iter().map(|s| s.name.as_str()).collect();
        self.pools.retain(|name, _| names.contains(name.as_str()));

        for service in services {
            let unchanged = self
                .pools
                .get(&service.name)
                .is_some_and(|pool| *pool.service == *service);
            if unchanged {
                continue;
            }

            let pool = ServicePool::new(
                Arc::new(service.clone()),
                &self.default_breaker,
                self.connections.clone(),
            );
            self.pools.insert(service.name.clone(), Arc::new(pool));
        }

        let monitored: HashSet<String> = if self.checker.config().enabled {
            services
                .iter()
                .filter(|s| s.health_check_enabled())
                .flat_map(|s| s.all_targets())
                .collect()
        } else {
            HashSet::new()
        };
        self.checker.sync_targets(&monitored);

        tracing::info!(
            services = services.len(),
            monitored_targets = monitored.len(),
            "Service table updated"
        );
    }

    pub fn service(&self, name: &str) -> Option<Arc<ServiceConfig>> {
        self.pools.get(name).map(|pool| pool.service.clone())
    }

    /// Pick a target for `service`, skipping `exclude` when possible.
    pub fn select(
        &self,
        service: &str,
        req: &RequestInfo<'_>,
        exclude: &[String],
    ) -> Result<Selection, DispatchError> {
        let pool = self
            .pools
            .get(service)
            .map(|p| p.clone())
            .ok_or_else(|| DispatchError::UnknownService(service.to_string()))?;

        let config = &pool.service;
        let primary = &config.targets;
        let candidates = self.canary.get_targets(req, config);
        let canary = !std::ptr::eq(candidates, primary.as_slice());
        if config.canary.as_ref().is_some_and(|c| c.enabled) {
            metrics::record_canary_decision(service, canary);
        }

        if candidates.is_empty() {
            return Err(DispatchError::NoTargets(service.to_string()));
        }

        let candidates = fail_open(candidates.to_vec(), |t| !exclude.contains(t));
        let candidates = fail_open(candidates, |t| self.checker.is_healthy(t));
        let candidates = fail_open(candidates, |t| {
            self.breakers.state_of(&pool.breaker_name(t)) != Some(State::Open)
        });

        let target = pool
            .pick(&candidates)
            .ok_or_else(|| DispatchError::NoTargets(service.to_string()))?
            .to_string();

        let breaker = self
            .breakers
            .get_breaker(&pool.breaker_name(&target), pool.breaker_settings());

        tracing::debug!(
            service = %service,
            target = %target,
            canary,
            candidates = candidates.len(),
            "Target selected"
        );

        Ok(Selection {
            service: pool.service.clone(),
            target,
            canary,
            breaker,
        })
    }

    /// Select a target and run `call(target)` through its breaker.
    ///
    /// `Err` from `call` is recorded as a breaker failure. A breaker
    /// rejection means `call` was never invoked.
    pub async fn dispatch<T, E, F, Fut>(
        &self,
        service: &str,
        req: &RequestInfo<'_>,
        exclude: &[String],
        call: F,
    ) -> Result<Dispatched<T>, DispatchError<E>>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let selection = self.select(service, req, exclude).map_err(DispatchError::<Infallible>::widen)?;
        let Selection {
            target,
            canary,
            breaker,
            ..
        } = selection;

        let _in_flight = self.connections.acquire(&target);
        let upstream = target.clone();

        match breaker.execute_async(move || call(upstream)).await {
            Ok(value) => Ok(Dispatched {
                target,
                canary,
                value,
            }),
            Err(BreakerError::Open) => {
                metrics::record_breaker_rejection(breaker.name(), "open");
                Err(DispatchError::CircuitOpen { target })
            }
            Err(BreakerError::TooManyRequests) => {
                metrics::record_breaker_rejection(breaker.name(), "too_many_requests");
                Err(DispatchError::TooManyRequests { target })
            }
            Err(BreakerError::Call(error)) => Err(DispatchError::Upstream { target, error }),
        }
    }

    /// Health of every monitored target, for status surfaces.
    pub fn targets_health(&self) -> HashMap<String, TargetHealth> {
        self.checker.all_targets_health()
    }
}

fn fail_open(candidates: Vec<String>, keep: impl Fn(&String) -> bool) -> Vec<String> {
    let filtered: Vec<String> = candidates.iter().filter(|t| keep(t)).cloned().collect();
    if filtered.is_empty() {
        candidates
    } else {
        filtered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CanaryConfig, HealthCheckConfig, LoadBalancing};
    use crate::health::alerts::tests::RecordingSink;
    use crate::health::state::ProbeResult;
    use crate::resilience::Settings;
    use axum::http::{HeaderMap, HeaderValue};
    use std::time::Duration;

    const A: &str = "http://a:3000";
    const B: &str = "http://b:3000";

    fn selector() -> TargetSelector {
        let health = HealthCheckConfig {
            unhealthy_threshold: 1,
            ..Default::default()
        };
        let checker = Arc::new(TargetChecker::new(health, Arc::new(RecordingSink::default())).unwrap());
        let breaker = CircuitBreakerConfig {
            min_requests: 2,
            ..Default::default()
        };
        TargetSelector::new(checker, Arc::new(BreakerManager::new()), breaker)
    }

    fn orders() -> ServiceConfig {
        ServiceConfig::new("orders", vec![A.to_string(), B.to_string()])
    }

    fn fail(selector: &TargetSelector, target: &str) {
        selector
            .checker()
            .record_result(target, &ProbeResult::failed(Duration::from_millis(1), "down"));
    }

    #[test]
    fn test_unknown_service() {
        let selector = selector();
        let headers = HeaderMap::new();
        let req = RequestInfo::new(&headers, None);
        assert!(matches!(
            selector.select("missing", &req, &[]),
            Err(DispatchError::UnknownService(_))
        ));
    }

    #[test]
    fn test_health_filter_and_fail_open() {
        let selector = selector();
        selector.sync_services(&[orders()]);
        let headers = HeaderMap::new();
        let req = RequestInfo::new(&headers, None);

        fail(&selector, A);
        for _ in 0..4 {
            assert_eq!(selector.select("orders", &req, &[]).unwrap().target, B);
        }

        fail(&selector, B);
        let picked: HashSet<String> = (0..4)
            .map(|_| selector.select("orders", &req, &[]).unwrap().target)
            .collect();
        assert_eq!(picked.len(), 2, "all unhealthy: every target stays eligible");
    }

    #[test]
    fn test_exclude() {
        let selector = selector();
        selector.sync_services(&[orders()]);
        let headers = HeaderMap::new();
        let req = RequestInfo::new(&headers, None);

        for _ in 0..4 {
            let picked = selector.select("orders", &req, &[A.to_string()]).unwrap();
            assert_eq!(picked.target, B);
        }

        let everything = vec![A.to_string(), B.to_string()];
        assert!(selector.select("orders", &req, &everything).is_ok());
    }

    #[tokio::test]
    async fn test_open_breaker_skipped() {
        let selector = selector();
        selector.sync_services(&[orders()]);
        let headers = HeaderMap::new();
        let req = RequestInfo::new(&headers, None);

        let breaker = selector.breakers().get_breaker(
            &format!("orders@{}", A),
            &Settings::from(&CircuitBreakerConfig {
                min_requests: 1,
                ..Default::default()
            }),
        );
        let _ = breaker.execute(|| Err::<(), _>("boom"));
        assert_eq!(breaker.state(), State::Open);

        for _ in 0..4 {
            let result = selector
                .dispatch("orders", &req, &[], |target| async move { Ok::<_, String>(target) })
                .await
                .unwrap();
            assert_eq!(result.value, B);
        }
    }

    #[tokio::test]
    async fn test_rejection_when_all_open() {
        let selector = selector();
        let mut service = orders();
        service.targets = vec![A.to_string()];
        selector.sync_services(&[service]);
        let headers = HeaderMap::new();
        let req = RequestInfo::new(&headers, None);

        for _ in 0..2 {
            let result = selector
                .dispatch("orders", &req, &[], |_| async { Err::<(), _>("refused") })
                .await;
            assert!(matches!(result, Err(DispatchError::Upstream { .. })));
        }

        let called = std::sync::atomic::AtomicBool::new(false);
        let result = selector
            .dispatch("orders", &req, &[], |_| async {
                called.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok::<_, &str>(())
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.is_rejection());
        assert_eq!(err.target(), Some(A));
        assert!(!called.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn test_canary_candidates() {
        let selector = selector();
        let mut service = orders();
        service.canary = Some(CanaryConfig {
            enabled: true,
            targets: vec!["http://canary:3000".to_string()],
            header: Some("x-canary".to_string()),
            header_value: Some("1".to_string()),
            ..Default::default()
        });
        selector.sync_services(&[service]);

        let mut headers = HeaderMap::new();
        headers.insert("x-canary", HeaderValue::from_static("1"));
        let selection = selector.select("orders", &RequestInfo::new(&headers, None), &[]).unwrap();
        assert!(selection.canary);
        assert_eq!(selection.target, "http://canary:3000");

        let plain = HeaderMap::new();
        let selection = selector.select("orders", &RequestInfo::new(&plain, None), &[]).unwrap();
        assert!(!selection.canary);
    }

    #[test]
    fn test_sync_keeps_unchanged_pools() {
        let selector = selector();
        selector.sync_services(&[orders()]);
        let before = selector.pools.get("orders").map(|p| p.clone()).unwrap();

        selector.sync_services(&[orders()]);
        let after = selector.pools.get("orders").map(|p| p.clone()).unwrap();
        assert!(Arc::ptr_eq(&before, &after));

        let mut changed = orders();
        changed.load_balancing = LoadBalancing::Random;
        selector.sync_services(&[changed]);
        let replaced = selector.pools.get("orders").map(|p| p.clone()).unwrap();
        assert!(!Arc::ptr_eq(&before, &replaced));

        selector.sync_services(&[]);
        assert!(selector.service("orders").is_none());
        assert!(selector.targets_health().is_empty());
    }

    #[test]
    fn test_sync_monitors_targets() {
        let selector = selector();
        let mut unmonitored = ServiceConfig::new("search", vec!["http://search:3000".to_string()]);
        unmonitored.health_check = Some(crate::config::ServiceHealthCheck { enabled: false });
        selector.sync_services(&[orders(), unmonitored]);

        let health = selector.targets_health();
        assert!(health.contains_key(A));
        assert!(health.contains_key(B));
        assert!(!health.contains_key("http://search:3000"));
    }
}
