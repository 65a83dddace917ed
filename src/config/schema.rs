//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Backend services and their dispatch policies.
    pub services: Vec<ServiceConfig>,

    /// Gateway-wide active health check settings.
    pub health_check: HealthCheckConfig,

    /// Default circuit breaker settings, used by services without their own.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Alert delivery settings.
    pub alerts: AlertsConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

impl GatewayConfig {
    /// Look up a service by name.
    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.iter().find(|s| s.name == name)
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum buffered request body size in bytes.
    pub max_body_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_size: 2 * 1024 * 1024,
        }
    }
}

/// Load balancing strategy for a service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadBalancing {
    #[default]
    RoundRobin,
    Random,
    Weighted,
    LeastConnections,
}

/// Granularity of circuit breakers for a service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerScope {
    /// One breaker shared by every target of the service.
    Service,
    /// One breaker per target, named `service@target`.
    #[default]
    Target,
}

/// A backend service: its targets and how requests are dispatched to them.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ServiceConfig {
    /// Unique service name; also the breaker name prefix.
    pub name: String,

    /// Path prefix routed to this service.
    #[serde(default = "default_base_path")]
    pub base_path: String,

    /// Remove `base_path` before forwarding.
    #[serde(default)]
    pub strip_base_path: bool,

    /// Host header to match (exact match, case-insensitive).
    #[serde(default)]
    pub host: Option<String>,

    /// Primary target base URLs (e.g., "http://10.0.0.1:3000").
    pub targets: Vec<String>,

    /// Target selection strategy.
    #[serde(default)]
    pub load_balancing: LoadBalancing,

    /// Per-target weights for weighted load balancing (default: 1).
    #[serde(default)]
    pub weights: HashMap<String, u32>,

    /// Canary routing policy.
    #[serde(default)]
    pub canary: Option<CanaryConfig>,

    /// Service-level health check toggle. Targets are monitored unless disabled here.
    #[serde(default)]
    pub health_check: Option<ServiceHealthCheck>,

    /// Service-level breaker settings (falls back to the gateway default).
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,

    /// Whether breakers are kept per service or per target.
    #[serde(default)]
    pub breaker_scope: BreakerScope,

    /// Upstream request timeout in milliseconds (falls back to `timeouts.request_secs`).
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_base_path() -> String {
    "/".to_string()
}

impl ServiceConfig {
    /// Create a service with default policies.
    pub fn new(name: impl Into<String>, targets: Vec<String>) -> Self {
        Self {
            name: name.into(),
            base_path: default_base_path(),
            strip_base_path: false,
            host: None,
            targets,
            load_balancing: LoadBalancing::default(),
            weights: HashMap::new(),
            canary: None,
            health_check: None,
            circuit_breaker: None,
            breaker_scope: BreakerScope::default(),
            timeout_ms: None,
        }
    }

    /// Whether the service's targets are actively health checked.
    pub fn health_check_enabled(&self) -> bool {
        self.health_check.as_ref().map_or(true, |h| h.enabled)
    }

    /// Primary and canary targets, deduplicated, in declaration order.
    pub fn all_targets(&self) -> Vec<String> {
        let mut all: Vec<String> = Vec::new();
        let canary = self.canary.iter().flat_map(|c| c.targets.iter());
        for target in self.targets.iter().chain(canary) {
            if !all.contains(target) {
                all.push(target.clone());
            }
        }
        all
    }
}

/// Canary routing policy for a service.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CanaryConfig {
    /// Master switch.
    pub enabled: bool,

    /// Canary target base URLs.
    pub targets: Vec<String>,

    /// Percentage of clients routed to canary (0-100), sticky by client IP.
    pub weight: u32,

    /// Header that forces canary routing when equal to `header_value`.
    pub header: Option<String>,
    pub header_value: Option<String>,

    /// Cookie that forces canary routing when equal to `cookie_value`.
    pub cookie_name: Option<String>,
    pub cookie_value: Option<String>,
}

/// Per-service health check toggle.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ServiceHealthCheck {
    pub enabled: bool,
}

/// Active health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Probe interval in milliseconds.
    pub interval_ms: u64,

    /// Per-probe timeout in milliseconds.
    pub timeout_ms: u64,

    /// Number of consecutive failures before marking unhealthy.
    pub unhealthy_threshold: u32,

    /// Number of consecutive successes before marking healthy.
    pub healthy_threshold: u32,

    /// Status codes that count as a passing probe.
    pub expected_status: Vec<u16>,

    /// Skip TLS certificate verification for https targets.
    pub insecure_skip_verify: bool,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 30_000,
            timeout_ms: 5_000,
            unhealthy_threshold: 3,
            healthy_threshold: 2,
            expected_status: vec![200, 204],
            insecure_skip_verify: false,
        }
    }
}

impl HealthCheckConfig {
    /// Replace zero or empty settings with their defaults.
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if self.interval_ms == 0 {
            self.interval_ms = defaults.interval_ms;
        }
        if self.timeout_ms == 0 {
            self.timeout_ms = defaults.timeout_ms;
        }
        if self.unhealthy_threshold == 0 {
            self.unhealthy_threshold = defaults.unhealthy_threshold;
        }
        if self.healthy_threshold == 0 {
            self.healthy_threshold = defaults.healthy_threshold;
        }
        if self.expected_status.is_empty() {
            self.expected_status = defaults.expected_status;
        }
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Trial calls allowed while half-open (0 is treated as 1).
    pub max_requests: u32,

    /// Closed-state counting window in milliseconds (0 is treated as 60s).
    pub interval_ms: u64,

    /// Open-state duration in milliseconds before a trial is allowed (0 is treated as 60s).
    pub timeout_ms: u64,

    /// Failure ratio at or above which the breaker trips.
    pub failure_ratio: f64,

    /// Minimum requests observed in the window before the ratio is considered.
    pub min_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_requests: 1,
            interval_ms: 60_000,
            timeout_ms: 60_000,
            failure_ratio: 0.5,
            min_requests: 5,
        }
    }
}

/// Alert delivery configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// Optional webhook receiving alerts as JSON.
    pub webhook_url: Option<String>,

    /// Minimum seconds between two alerts of the same type for the same target.
    pub min_interval_secs: u64,

    /// Capacity of the pending alert queue.
    pub queue_size: usize,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            min_interval_secs: 300,
            queue_size: 100,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream request timeout in seconds.
    pub request_secs: u64,

    /// Total time allowed to serve a client request in seconds.
    pub server_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            server_secs: 60,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries.
    pub enabled: bool,

    /// Maximum number of attempts, first one included.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Percentage of requests that can be retries (retry budget).
    /// e.g., 0.1 for 10% budget.
    pub budget_ratio: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
            budget_ratio: 0.1,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
