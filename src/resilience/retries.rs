//! Retry policy for failover between targets.
//!
//! # Responsibilities
//! - Decide whether a failed attempt may be retried on another target
//! - Enforce a retry budget so retries stay a fraction of total traffic
//!
//! Only idempotent methods are retried. Breaker rejections and connection
//! errors are always retryable since the request never reached the target.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::http::{Method, StatusCode};
use parking_lot::Mutex;

const BUDGET_WINDOW: Duration = Duration::from_secs(10);

/// Why the previous attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptFailure {
    /// The breaker rejected the call; nothing was sent.
    Rejected,
    /// Connecting or reading from the target failed.
    Transport,
    /// The target timed out.
    Timeout,
    /// The target answered with this status.
    Status(StatusCode),
}

/// Whether an attempt that failed this way may be retried.
pub fn is_retryable(method: &Method, failure: AttemptFailure) -> bool {
    match failure {
        AttemptFailure::Rejected => true,
        _ if !method.is_idempotent() => false,
        AttemptFailure::Transport | AttemptFailure::Timeout => true,
        AttemptFailure::Status(status) => matches!(
            status,
            StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
        ),
    }
}

/// Token-style retry budget over a rolling window.
///
/// Retries are allowed while `retries < min_retries + ratio * requests` for the
/// current window.
#[derive(Debug)]
pub struct RetryBudget {
    ratio: f32,
    min_retries: u64,
    requests: AtomicU64,
    retries: AtomicU64,
    window_start: Mutex<Instant>,
}

impl RetryBudget {
    pub fn new(ratio: f32, min_retries: u64) -> Self {
        Self {
            ratio: ratio.max(0.0),
            min_retries,
            requests: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            window_start: Mutex::new(Instant::now()),
        }
    }

    pub fn record_request(&self) {
        self.roll_window();
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Reserve one retry if the budget allows it.
    pub fn can_retry(&self) -> bool {
        self.roll_window();
        let requests = self.requests.load(Ordering::Relaxed);
        let allowed = self.min_retries + (requests as f64 * f64::from(self.ratio)) as u64;

        self.retries
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                (used < allowed).then_some(used + 1)
            })
            .is_ok()
    }

    fn roll_window(&self) {
        let mut start = self.window_start.lock();
        if start.elapsed() >= BUDGET_WINDOW {
            *start = Instant::now();
            self.requests.store(0, Ordering::Relaxed);
            self.retries.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable() {
        assert!(is_retryable(&Method::GET, AttemptFailure::Transport));
        assert!(is_retryable(&Method::GET, AttemptFailure::Status(StatusCode::BAD_GATEWAY)));
        assert!(!is_retryable(&Method::GET, AttemptFailure::Status(StatusCode::NOT_FOUND)));
        assert!(!is_retryable(&Method::POST, AttemptFailure::Transport));
        // A rejected call never reached the target, so even POST can move on.
        assert!(is_retryable(&Method::POST, AttemptFailure::Rejected));
    }

    #[test]
    fn test_budget_limits_retries() {
        let budget = RetryBudget::new(0.5, 1);
        for _ in 0..4 {
            budget.record_request();
        }
        // 1 + 0.5 * 4 = 3
        assert!(budget.can_retry());
        assert!(budget.can_retry());
        assert!(budget.can_retry());
        assert!(!budget.can_retry());
    }

    #[test]
    fn test_zero_ratio_uses_floor() {
        let budget = RetryBudget::new(0.0, 0);
        budget.record_request();
        assert!(!budget.can_retry());
    }
}
