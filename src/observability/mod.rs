//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Breakers, health checker, alerts and the proxy handler produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Prometheus scrape endpoint
//! ```

pub mod logging;
pub mod metrics;
