//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Probe every target concurrently
//!     → Update state.rs
//!     → On transition: alerts.rs
//!
//! State machine (state.rs):
//!     Healthy ←→ Unhealthy
//!     Guarded by consecutive-result thresholds
//! ```
//!
//! # Design Decisions
//! - State transitions require consecutive successes/failures
//! - Health state is per target URL, shared by every service using it
//! - Unknown targets are treated as healthy

pub mod active;
pub mod alerts;
pub mod state;

pub use active::TargetChecker;
pub use alerts::{Alert, AlertManager, AlertSink, AlertType, Severity};
pub use state::{TargetHealth, TargetStatus};
