//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → metrics → engine → watcher → admin → proxy listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → stop accepting → drain → stop health checks → flush alerts
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger graceful shutdown
//! ```

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
