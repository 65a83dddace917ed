//! API gateway: backend dispatch and resilience engine.
//!
//! Requests are matched to a service, routed to its primary or canary targets,
//! filtered by active health checks and circuit breaker state, balanced across
//! the remaining targets and executed through a per-target circuit breaker.

pub mod admin;
pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod resilience;
pub mod routing;

pub use config::GatewayConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
