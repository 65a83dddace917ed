//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (weights reference declared targets)
//! - Validate value ranges (ratios, percentages, status codes)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Zero thresholds are not errors; the engine defaults them

use std::collections::HashSet;

use thiserror::Error;
use url::Url;

use crate::config::schema::{CircuitBreakerConfig, GatewayConfig, HealthCheckConfig, ServiceConfig};

/// A single semantic problem in a configuration document.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("service at index {0} has an empty name")]
    EmptyServiceName(usize),
    #[error("service '{0}' is declared more than once")]
    DuplicateService(String),
    #[error("service '{0}' has no targets")]
    NoTargets(String),
    #[error("service '{service}' has invalid target URL '{target}'")]
    InvalidTarget { service: String, target: String },
    #[error("service '{service}' has weight for unknown target '{target}'")]
    UnknownWeightTarget { service: String, target: String },
    #[error("service '{0}' has canary weight above 100")]
    CanaryWeight(String),
    #[error("{scope}: failure_ratio must be within 0.0..=1.0")]
    FailureRatio { scope: String },
    #[error("{scope}: expected status {status} is not an HTTP status code")]
    ExpectedStatus { scope: String, status: u16 },
    #[error("base_path '{0}' must start with '/'")]
    BasePath(String),
}

/// Validate a configuration document, collecting every error.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut names = HashSet::new();

    validate_breaker("circuit_breaker", &config.circuit_breaker, &mut errors);
    validate_health("health_check", &config.health_check, &mut errors);

    for (index, service) in config.services.iter().enumerate() {
        if service.name.trim().is_empty() {
            errors.push(ValidationError::EmptyServiceName(index));
        } else if !names.insert(service.name.as_str()) {
            errors.push(ValidationError::DuplicateService(service.name.clone()));
        }
        validate_service(service, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_service(service: &ServiceConfig, errors: &mut Vec<ValidationError>) {
    if service.targets.is_empty() {
        errors.push(ValidationError::NoTargets(service.name.clone()));
    }
    if !service.base_path.starts_with('/') {
        errors.push(ValidationError::BasePath(service.base_path.clone()));
    }

    for target in service.all_targets() {
        if !is_valid_target(&target) {
            errors.push(ValidationError::InvalidTarget {
                service: service.name.clone(),
                target,
            });
        }
    }

    let all_targets = service.all_targets();
    for target in service.weights.keys() {
        if !all_targets.contains(target) {
            errors.push(ValidationError::UnknownWeightTarget {
                service: service.name.clone(),
                target: target.clone(),
            });
        }
    }

    if let Some(canary) = &service.canary {
        if canary.weight > 100 {
            errors.push(ValidationError::CanaryWeight(service.name.clone()));
        }
    }

    if let Some(breaker) = &service.circuit_breaker {
        validate_breaker(&format!("service '{}'", service.name), breaker, errors);
    }
}

fn validate_breaker(scope: &str, config: &CircuitBreakerConfig, errors: &mut Vec<ValidationError>) {
    if !(0.0..=1.0).contains(&config.failure_ratio) {
        errors.push(ValidationError::FailureRatio {
            scope: scope.to_string(),
        });
    }
}

fn validate_health(scope: &str, config: &HealthCheckConfig, errors: &mut Vec<ValidationError>) {
    for status in &config.expected_status {
        if !(100..=599).contains(status) {
            errors.push(ValidationError::ExpectedStatus {
                scope: scope.to_string(),
                status: *status,
            });
        }
    }
}

fn is_valid_target(target: &str) -> bool {
    match Url::parse(target) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host().is_some(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::CanaryConfig;

    fn service(name: &str, targets: &[&str]) -> ServiceConfig {
        ServiceConfig::new(name, targets.iter().map(|t| t.to_string()).collect())
    }

    #[test]
    fn test_valid_config() {
        let mut config = GatewayConfig::default();
        config.services.push(service("orders", &["http://127.0.0.1:3000"]));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = GatewayConfig::default();
        config.services.push(service("orders", &["http://127.0.0.1:3000"]));
        config.services.push(service("orders", &["not a url"]));

        let mut bad = service("", &[]);
        bad.canary = Some(CanaryConfig {
            enabled: true,
            weight: 150,
            ..Default::default()
        });
        config.services.push(bad);
        config.circuit_breaker.failure_ratio = 1.5;

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::DuplicateService("orders".into())));
        assert!(errors.contains(&ValidationError::InvalidTarget {
            service: "orders".into(),
            target: "not a url".into(),
        }));
        assert!(errors.contains(&ValidationError::EmptyServiceName(2)));
        assert!(errors.contains(&ValidationError::NoTargets(String::new())));
        assert!(errors.contains(&ValidationError::CanaryWeight(String::new())));
        assert!(errors.contains(&ValidationError::FailureRatio {
            scope: "circuit_breaker".into()
        }));
    }

    #[test]
    fn test_unknown_weight_target() {
        let mut config = GatewayConfig::default();
        let mut orders = service("orders", &["http://127.0.0.1:3000"]);
        orders.weights.insert("http://127.0.0.1:4000".into(), 3);
        config.services.push(orders);

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
    }
}
