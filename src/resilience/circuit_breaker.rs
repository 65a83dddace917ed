//! Circuit breaker for backend protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: backend assumed down, requests fail fast
//! - Half-Open: a bounded number of trial requests test recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: ready_to_trip(counts) after a failure
//! Closed → Closed (new generation): counting window rolled over
//! Open → Half-Open: after the open timeout
//! Half-Open → Closed: first trial succeeds
//! Half-Open → Open: first trial fails
//! ```
//!
//! # Design Decisions
//! - Per-backend circuit breaker (not global)
//! - The wrapped call runs without holding the breaker lock
//! - Every transition starts a new generation; outcomes reported against an
//!   older generation are dropped
//! - A panic inside the wrapped call counts as a failure and keeps unwinding

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::config::CircuitBreakerConfig;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum State {
    Closed,
    HalfOpen,
    Open,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Closed => "closed",
            State::HalfOpen => "half-open",
            State::Open => "open",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request outcomes observed during the current generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    pub fn failure_ratio(&self) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        f64::from(self.total_failures) / f64::from(self.requests)
    }

    fn on_request(&mut self) {
        self.requests = self.requests.saturating_add(1);
    }

    fn on_success(&mut self) {
        self.total_successes = self.total_successes.saturating_add(1);
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures = self.total_failures.saturating_add(1);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
    }
}

/// Trip predicate evaluated after every failure.
pub type ReadyToTrip = Arc<dyn Fn(&Counts) -> bool + Send + Sync>;

/// Transition observer: `(breaker name, from, to)`. Runs under the breaker lock.
pub type StateChangeHook = Arc<dyn Fn(&str, State, State) + Send + Sync>;

/// Breaker construction settings.
#[derive(Clone)]
pub struct Settings {
    pub max_requests: u32,
    pub interval: Duration,
    pub timeout: Duration,
    pub failure_ratio: f64,
    pub min_requests: u32,
    pub ready_to_trip: Option<ReadyToTrip>,
    pub on_state_change: Option<StateChangeHook>,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from(&CircuitBreakerConfig::default())
    }
}

impl From<&CircuitBreakerConfig> for Settings {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            max_requests: config.max_requests,
            interval: Duration::from_millis(config.interval_ms),
            timeout: Duration::from_millis(config.timeout_ms),
            failure_ratio: config.failure_ratio,
            min_requests: config.min_requests,
            ready_to_trip: None,
            on_state_change: None,
        }
    }
}

impl Settings {
    pub fn with_ready_to_trip(mut self, f: impl Fn(&Counts) -> bool + Send + Sync + 'static) -> Self {
        self.ready_to_trip = Some(Arc::new(f));
        self
    }

    pub fn with_state_change(mut self, f: impl Fn(&str, State, State) + Send + Sync + 'static) -> Self {
        self.on_state_change = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("max_requests", &self.max_requests)
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .field("failure_ratio", &self.failure_ratio)
            .field("min_requests", &self.min_requests)
            .field("ready_to_trip", &self.ready_to_trip.is_some())
            .field("on_state_change", &self.on_state_change.is_some())
            .finish()
    }
}

/// Error returned by [`CircuitBreaker::execute`].
///
/// `Open` and `TooManyRequests` mean the call was never attempted.
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    #[error("circuit breaker is open")]
    Open,
    #[error("too many requests")]
    TooManyRequests,
    #[error("{0}")]
    Call(E),
}

impl<E> BreakerError<E> {
    /// True when the breaker rejected the call without running it.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, BreakerError::Call(_))
    }
}

#[derive(Debug)]
struct Inner {
    state: State,
    generation: u64,
    counts: Counts,
    /// Rollover time when closed, trial time when open.
    expiry: Option<Instant>,
}

/// A three-state circuit breaker guarding calls to one backend or service.
pub struct CircuitBreaker {
    name: String,
    max_requests: u32,
    interval: Duration,
    timeout: Duration,
    ready_to_trip: ReadyToTrip,
    on_state_change: Option<StateChangeHook>,
    inner: Mutex<Inner>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("inner", &*self.inner.lock())
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a breaker. Zero `max_requests` becomes 1; zero `interval` and zero
    /// `timeout` become 60s.
    pub fn new(name: impl Into<String>, settings: Settings) -> Self {
        let min_requests = settings.min_requests;
        let failure_ratio = settings.failure_ratio;
        let ready_to_trip = settings.ready_to_trip.unwrap_or_else(|| {
            Arc::new(move |counts: &Counts| {
                counts.requests >= min_requests && counts.failure_ratio() >= failure_ratio
            })
        });

        let breaker = Self {
            name: name.into(),
            max_requests: settings.max_requests.max(1),
            interval: if settings.interval.is_zero() {
                DEFAULT_INTERVAL
            } else {
                settings.interval
            },
            timeout: if settings.timeout.is_zero() {
                DEFAULT_TIMEOUT
            } else {
                settings.timeout
            },
            ready_to_trip,
            on_state_change: settings.on_state_change,
            inner: Mutex::new(Inner {
                state: State::Closed,
                generation: 0,
                counts: Counts::default(),
                expiry: None,
            }),
        };

        {
            let mut inner = breaker.inner.lock();
            breaker.to_new_generation(&mut inner, Instant::now());
        }
        breaker
    }

    /// Create a breaker with default settings.
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, Settings::default())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, applying any transition that is due.
    pub fn state(&self) -> State {
        let mut inner = self.inner.lock();
        self.current_state(&mut inner, Instant::now()).0
    }

    /// Counts of the current generation.
    pub fn counts(&self) -> Counts {
        self.inner.lock().counts
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Run `f` if the breaker admits it and record its outcome.
    ///
    /// `Ok` is a success, `Err` a failure. A panic in `f` is recorded as a
    /// failure and then resumes unwinding.
    pub fn execute<T, E, F>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let generation = self.before_request()?;
        let guard = OutcomeGuard::new(self, generation);
        let result = f();
        guard.finish(result.is_ok());
        result.map_err(BreakerError::Call)
    }

    /// Async form of [`execute`](Self::execute).
    ///
    /// Deadlines and cancellation belong to the future itself. A future that is
    /// dropped before completing is recorded as a failure.
    pub async fn execute_async<T, E, F, Fut>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let generation = self.before_request()?;
        let guard = OutcomeGuard::new(self, generation);
        let result = f().await;
        guard.finish(result.is_ok());
        result.map_err(BreakerError::Call)
    }

    fn before_request<E>(&self) -> Result<u64, BreakerError<E>> {
        let mut inner = self.inner.lock();
        let (state, generation) = self.current_state(&mut inner, Instant::now());

        match state {
            State::Open => Err(BreakerError::Open),
            State::HalfOpen if inner.counts.requests >= self.max_requests => {
                Err(BreakerError::TooManyRequests)
            }
            _ => {
                inner.counts.on_request();
                Ok(generation)
            }
        }
    }

    fn after_request(&self, before: u64, success: bool) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let (state, generation) = self.current_state(&mut inner, now);
        if generation != before {
            tracing::trace!(
                circuit_breaker = %self.name,
                generation = before,
                current = generation,
                "Discarding outcome from a previous generation"
            );
            return;
        }

        if success {
            inner.counts.on_success();
            if state == State::HalfOpen {
                self.set_state(&mut inner, State::Closed, now);
            }
        } else {
            inner.counts.on_failure();
            match state {
                State::HalfOpen => self.set_state(&mut inner, State::Open, now),
                State::Closed if (self.ready_to_trip)(&inner.counts) => {
                    self.set_state(&mut inner, State::Open, now)
                }
                _ => {}
            }
        }
    }

    fn current_state(&self, inner: &mut Inner, now: Instant) -> (State, u64) {
        match inner.state {
            State::Closed => {
                if inner.expiry.is_some_and(|expiry| expiry <= now) {
                    self.to_new_generation(inner, now);
                }
            }
            State::Open => {
                if inner.expiry.is_some_and(|expiry| expiry <= now) {
                    self.set_state(inner, State::HalfOpen, now);
                }
            }
            State::HalfOpen => {}
        }
        (inner.state, inner.generation)
    }

    fn set_state(&self, inner: &mut Inner, state: State, now: Instant) {
        if inner.state == state {
            return;
        }

        let prev = inner.state;
        inner.state = state;
        self.to_new_generation(inner, now);

        if let Some(hook) = &self.on_state_change {
            hook(&self.name, prev, state);
        }

        tracing::info!(
            circuit_breaker = %self.name,
            from_state = %prev,
            to_state = %state,
            "Circuit breaker state changed"
        );
    }

    fn to_new_generation(&self, inner: &mut Inner, now: Instant) {
        inner.generation += 1;
        inner.counts = Counts::default();
        inner.expiry = match inner.state {
            State::Closed => Some(now + self.interval),
            State::Open => Some(now + self.timeout),
            State::HalfOpen => None,
        };
    }
}

/// Records a failure if dropped before [`finish`](OutcomeGuard::finish), which
/// covers both unwinding panics and dropped futures.
struct OutcomeGuard<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    armed: bool,
}

impl<'a> OutcomeGuard<'a> {
    fn new(breaker: &'a CircuitBreaker, generation: u64) -> Self {
        Self {
            breaker,
            generation,
            armed: true,
        }
    }

    fn finish(mut self, success: bool) {
        self.armed = false;
        self.breaker.after_request(self.generation, success);
    }
}

impl Drop for OutcomeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.after_request(self.generation, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread::sleep;

    fn settings(min_requests: u32, failure_ratio: f64, timeout_ms: u64) -> Settings {
        Settings {
            max_requests: 1,
            interval: Duration::ZERO,
            timeout: Duration::from_millis(timeout_ms),
            failure_ratio,
            min_requests,
            ready_to_trip: None,
            on_state_change: None,
        }
    }

    fn fail(cb: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        cb.execute(|| Err::<(), _>("boom"))
    }

    fn succeed(cb: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        cb.execute(|| Ok::<_, &'static str>(()))
    }

    #[test]
    fn test_execute_passes_result_through() {
        let cb = CircuitBreaker::with_defaults("test");
        let result = cb.execute(|| Ok::<_, String>("success"));
        assert_eq!(result.unwrap(), "success");
        assert_eq!(cb.state(), State::Closed);
        assert_eq!(cb.counts().total_successes, 1);

        match cb.execute(|| Err::<(), _>("bad input".to_string())) {
            Err(BreakerError::Call(e)) => assert_eq!(e, "bad input"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_trips_when_ratio_met() {
        let cb = CircuitBreaker::new("test", settings(5, 0.5, 60_000));
        for _ in 0..2 {
            succeed(&cb).unwrap();
        }
        for _ in 0..3 {
            let _ = fail(&cb);
        }
        // 3 failures out of 5 requests
        assert_eq!(cb.state(), State::Open);
    }

    #[test]
    fn test_stays_closed_below_ratio() {
        let cb = CircuitBreaker::new("test", settings(5, 0.5, 60_000));
        let _ = fail(&cb);
        for _ in 0..3 {
            succeed(&cb).unwrap();
        }
        let _ = fail(&cb);
        // 2 failures out of 5 requests
        assert_eq!(cb.state(), State::Closed);
        assert_eq!(cb.counts().requests, 5);
    }

    #[test]
    fn test_min_requests_guards_trip() {
        let cb = CircuitBreaker::new("test", settings(5, 0.5, 60_000));
        for _ in 0..4 {
            let _ = fail(&cb);
        }
        assert_eq!(cb.state(), State::Closed);
        assert_eq!(cb.counts().consecutive_failures, 4);

        let _ = fail(&cb);
        assert_eq!(cb.state(), State::Open);
    }

    #[test]
    fn test_open_rejects_without_calling() {
        let cb = CircuitBreaker::new("test", settings(1, 0.5, 60_000));
        let _ = fail(&cb);

        let called = AtomicUsize::new(0);
        let result = cb.execute(|| {
            called.fetch_add(1, Ordering::SeqCst);
            Ok::<_, &str>(())
        });
        assert!(matches!(result, Err(BreakerError::Open)));
        assert_eq!(called.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_half_open_success_closes() {
        let cb = CircuitBreaker::new("test", settings(1, 0.5, 50));
        let _ = fail(&cb);
        assert_eq!(cb.state(), State::Open);
        let opened_generation = cb.generation();

        sleep(Duration::from_millis(80));
        assert_eq!(cb.state(), State::HalfOpen);

        succeed(&cb).unwrap();
        assert_eq!(cb.state(), State::Closed);
        assert_eq!(cb.counts(), Counts::default());
        assert!(cb.generation() > opened_generation);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let cb = CircuitBreaker::new("test", settings(1, 0.5, 50));
        let _ = fail(&cb);
        sleep(Duration::from_millis(80));

        let _ = fail(&cb);
        assert_eq!(cb.state(), State::Open);
        assert!(matches!(succeed(&cb), Err(BreakerError::Open)));
    }

    #[test]
    fn test_half_open_limits_trial_calls() {
        let cb = CircuitBreaker::new("test", settings(1, 0.5, 50));
        let _ = fail(&cb);
        sleep(Duration::from_millis(80));

        // The breaker lock is not held during the call, so a second caller
        // arriving while the trial is in flight is turned away.
        let result = cb.execute(|| {
            let nested = succeed(&cb);
            assert!(matches!(nested, Err(BreakerError::TooManyRequests)));
            Ok::<_, &str>(())
        });
        assert!(result.is_ok());
        assert_eq!(cb.state(), State::Closed);
    }

    #[test]
    fn test_window_rollover_resets_counts() {
        let mut s = settings(3, 0.5, 60_000);
        s.interval = Duration::from_millis(50);
        let cb = CircuitBreaker::new("test", s);

        let _ = fail(&cb);
        let _ = fail(&cb);
        let generation = cb.generation();
        sleep(Duration::from_millis(80));

        // Rollover happened, so the third failure starts a fresh window.
        let _ = fail(&cb);
        assert_eq!(cb.state(), State::Closed);
        assert_eq!(cb.counts().requests, 1);
        assert_eq!(cb.generation(), generation + 1);
    }

    #[test]
    fn test_stale_generation_outcome_discarded() {
        let cb = CircuitBreaker::new("test", settings(1, 0.5, 60_000));

        let result = cb.execute(|| {
            // Another caller trips the breaker while this call is in flight.
            let _ = fail(&cb);
            Ok::<_, &str>(())
        });
        assert!(result.is_ok());
        // The late success belongs to the closed generation and must not close the breaker.
        assert_eq!(cb.state(), State::Open);
        assert_eq!(cb.counts(), Counts::default());
    }

    #[test]
    fn test_panic_recorded_as_failure() {
        let cb = CircuitBreaker::new("test", settings(1, 0.5, 60_000));

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let _ = cb.execute(|| -> Result<(), &str> { panic!("backend exploded") });
        }));

        assert!(outcome.is_err(), "panic must reach the caller");
        assert_eq!(cb.state(), State::Open);
    }

    #[test]
    fn test_state_change_hook() {
        let transitions = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen = transitions.clone();
        let s = settings(1, 0.5, 50).with_state_change(move |name, from, to| {
            seen.lock().push((name.to_string(), from, to));
        });
        let cb = CircuitBreaker::new("orders", s);

        let _ = fail(&cb);
        sleep(Duration::from_millis(80));
        succeed(&cb).unwrap();

        let transitions = transitions.lock();
        assert_eq!(
            *transitions,
            vec![
                ("orders".to_string(), State::Closed, State::Open),
                ("orders".to_string(), State::Open, State::HalfOpen),
                ("orders".to_string(), State::HalfOpen, State::Closed),
            ]
        );
    }

    #[test]
    fn test_custom_ready_to_trip() {
        let s = Settings::default().with_ready_to_trip(|counts| counts.consecutive_failures >= 2);
        let cb = CircuitBreaker::new("test", s);

        let _ = fail(&cb);
        assert_eq!(cb.state(), State::Closed);
        let _ = fail(&cb);
        assert_eq!(cb.state(), State::Open);
    }

    #[test]
    fn test_zero_settings_are_defaulted() {
        let mut s = settings(1, 0.5, 0);
        s.max_requests = 0;
        let cb = CircuitBreaker::new("test", s);
        assert_eq!(cb.max_requests, 1);
        assert_eq!(cb.interval, DEFAULT_INTERVAL);
        assert_eq!(cb.timeout, DEFAULT_TIMEOUT);

        // The closed window still rolls over after the defaulted interval.
        let expiry = cb.inner.lock().expiry;
        assert!(expiry.is_some_and(|at| at > Instant::now() + Duration::from_secs(59)));
    }

    #[tokio::test]
    async fn test_execute_async() {
        let cb = CircuitBreaker::new("test", settings(2, 0.5, 60_000));

        let value = cb.execute_async(|| async { Ok::<_, &str>(7) }).await.unwrap();
        assert_eq!(value, 7);

        let _ = cb.execute_async(|| async { Err::<(), _>("down") }).await;
        assert_eq!(cb.state(), State::Open);
    }

    #[tokio::test]
    async fn test_dropped_future_recorded_as_failure() {
        let cb = CircuitBreaker::new("test", settings(1, 0.5, 60_000));

        let slow = cb.execute_async(|| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, &str>(())
        });
        let timed_out = tokio::time::timeout(Duration::from_millis(20), slow).await;

        assert!(timed_out.is_err());
        assert_eq!(cb.state(), State::Open);
    }
}
