//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path, headers)
//!     → router.rs (service lookup by host + base path)
//!     → canary.rs (primary or canary target list)
//!     → load_balancer::selector (pick and call one target)
//! ```
//!
//! # Design Decisions
//! - Routes compiled from config, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - Canary decisions are stateless and sticky per client IP

pub mod canary;
pub mod matcher;
pub mod router;

pub use canary::{CanaryRouter, RequestInfo};
pub use router::{Route, Router};
