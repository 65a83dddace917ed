//! Registry of named circuit breakers.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::observability::metrics;
use crate::resilience::circuit_breaker::{CircuitBreaker, Counts, Settings, State};

/// Snapshot of one breaker for status surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub state: State,
    pub counts: Counts,
    pub generation: u64,
}

/// Concurrent get-or-create registry of circuit breakers.
///
/// Breakers live for the lifetime of the manager. Every breaker created here
/// reports its transitions to metrics before invoking the caller's hook.
#[derive(Debug, Default)]
pub struct BreakerManager {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the breaker registered under `name`, creating it from `settings`
    /// if absent. Settings passed after creation are ignored.
    pub fn get_breaker(&self, name: &str, settings: &Settings) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return existing.clone();
        }

        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!(circuit_breaker = %name, "Creating circuit breaker");
                metrics::record_breaker_state(name, State::Closed);
                Arc::new(CircuitBreaker::new(name, instrumented(settings)))
            })
            .clone()
    }

    /// Look up an existing breaker without creating it.
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| b.clone())
    }

    /// Current state of a breaker, `None` if it was never created.
    pub fn state_of(&self, name: &str) -> Option<State> {
        self.get(name).map(|b| b.state())
    }

    /// Status of every registered breaker, ordered by name.
    pub fn breaker_status(&self) -> BTreeMap<String, BreakerStatus> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|entry| entry.value().clone()).collect();

        breakers
            .into_iter()
            .map(|breaker| {
                let status = BreakerStatus {
                    state: breaker.state(),
                    counts: breaker.counts(),
                    generation: breaker.generation(),
                };
                (breaker.name().to_string(), status)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

fn instrumented(settings: &Settings) -> Settings {
    let user_hook = settings.on_state_change.clone();
    settings.clone().with_state_change(move |name, from, to| {
        metrics::record_breaker_transition(name, from, to);
        if let Some(hook) = &user_hook {
            hook(name, from, to);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn trip_fast() -> Settings {
        Settings {
            min_requests: 1,
            ..Settings::default()
        }
    }

    #[test]
    fn test_get_or_create_returns_same_breaker() {
        let manager = BreakerManager::new();
        let a = manager.get_breaker("orders@http://a", &Settings::default());
        let b = manager.get_breaker("orders@http://a", &trip_fast());

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(manager.len(), 1);

        // First settings win: a single failure does not trip the default breaker.
        let _ = b.execute(|| Err::<(), _>("boom"));
        assert_eq!(a.state(), State::Closed);
    }

    #[test]
    fn test_get_does_not_create() {
        let manager = BreakerManager::new();
        assert!(manager.get("missing").is_none());
        assert!(manager.state_of("missing").is_none());
        assert!(manager.is_empty());
    }

    #[test]
    fn test_breaker_status() {
        let manager = BreakerManager::new();
        let payments = manager.get_breaker("payments", &trip_fast());
        manager.get_breaker("orders", &trip_fast());

        let _ = payments.execute(|| Err::<(), _>("boom"));

        let status = manager.breaker_status();
        let names: Vec<&str> = status.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["orders", "payments"]);
        assert_eq!(status["payments"].state, State::Open);
        assert_eq!(status["orders"].state, State::Closed);
        assert_eq!(status["orders"].counts, Counts::default());
    }

    #[test]
    fn test_user_hook_still_called() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let settings = trip_fast().with_state_change(move |_, _, _| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let manager = BreakerManager::new();
        let breaker = manager.get_breaker("search", &settings);
        let _ = breaker.execute(|| Err::<(), _>("boom"));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_get_breaker() {
        let manager = Arc::new(BreakerManager::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                std::thread::spawn(move || {
                    let settings = Settings {
                        timeout: Duration::from_secs(1),
                        ..Settings::default()
                    };
                    manager.get_breaker("shared", &settings)
                })
            })
            .collect();

        let breakers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(breakers.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
