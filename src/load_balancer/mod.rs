//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Service resolved
//!     → selector.rs (canary candidates, health filter, breaker filter)
//!     → pool.rs (the service's balancer and breaker naming)
//!     → Apply load balancing algorithm:
//!         - round_robin.rs (rotate through targets)
//!         - random.rs (uniform pick)
//!         - weighted.rs (smooth weighted round-robin)
//!         - least_conn.rs (fewest in-flight requests)
//!     → connections.rs (count the request while it is in flight)
//!     → breaker execute
//! ```
//!
//! # Design Decisions
//! - Balancers pick from whatever candidate slice they are given
//! - Balancer state is scoped per service
//! - Filters fail open: an empty filtered list falls back to the unfiltered one

pub mod connections;
pub mod least_conn;
pub mod pool;
pub mod random;
pub mod round_robin;
pub mod selector;
pub mod weighted;

pub use selector::{DispatchError, Dispatched, Selection, TargetSelector};

/// Picks one target URL from a candidate list.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    /// `None` only when `candidates` is empty.
    fn next_target<'a>(&self, candidates: &'a [String]) -> Option<&'a str>;
}
