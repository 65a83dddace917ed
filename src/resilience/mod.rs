//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatch to a target:
//!     → manager.rs (look up the breaker for service or service@target)
//!     → circuit_breaker.rs (admit or reject, record the outcome)
//!     → On failure: retries.rs (retryable? budget left?) + backoff.rs (delay)
//! ```
//!
//! # Design Decisions
//! - Breakers are registry objects passed by `Arc`, not process globals
//! - Retries only for idempotent requests, except breaker rejections
//! - Backoff adds up to 10% jitter

pub mod backoff;
pub mod circuit_breaker;
pub mod manager;
pub mod retries;

pub use circuit_breaker::{BreakerError, CircuitBreaker, Counts, Settings, State};
pub use manager::{BreakerManager, BreakerStatus};
