//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → server swaps its service table, health targets are synced
//! ```
//!
//! # Design Decisions
//! - A loaded config is never mutated; reloads replace the service table
//! - All fields have defaults to allow minimal configs
//! - Breaker and health state survive reloads; only policies change

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::{
    AdminConfig, AlertsConfig, BreakerScope, CanaryConfig, CircuitBreakerConfig, GatewayConfig,
    HealthCheckConfig, ListenerConfig, LoadBalancing, LogFormat, ObservabilityConfig, RetryConfig,
    ServiceConfig, ServiceHealthCheck, TimeoutConfig,
};
pub use loader::{load_config, parse_config, ConfigError};
pub use validation::{validate_config, ValidationError};
