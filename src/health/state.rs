//! Target health state machine.
//!
//! # States
//! - Healthy: target receives traffic
//! - Unhealthy: target filtered out by the selector (unless all are)
//! - Degraded: representable for external reporters, never entered by probing
//!
//! # State Transitions
//! ```text
//! Healthy → Unhealthy: consecutive_fails >= unhealthy_threshold
//! Unhealthy/Degraded → Healthy: consecutive_passes >= healthy_threshold
//! ```
//!
//! Counters keep running across transitions; only the opposite outcome resets them.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    Healthy,
    Unhealthy,
    Degraded,
}

impl TargetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetStatus::Healthy => "healthy",
            TargetStatus::Unhealthy => "unhealthy",
            TargetStatus::Degraded => "degraded",
        }
    }
}

impl std::fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one probe.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub success: bool,
    pub response_time: Duration,
    pub error: Option<String>,
}

impl ProbeResult {
    pub fn passed(response_time: Duration) -> Self {
        Self {
            success: true,
            response_time,
            error: None,
        }
    }

    pub fn failed(response_time: Duration, error: impl Into<String>) -> Self {
        Self {
            success: false,
            response_time,
            error: Some(error.into()),
        }
    }
}

/// Health record of a single monitored target.
#[derive(Debug, Clone, Serialize)]
pub struct TargetHealth {
    pub url: String,
    pub status: TargetStatus,
    pub last_check: Option<DateTime<Utc>>,
    pub consecutive_fails: u32,
    pub consecutive_passes: u32,
    pub last_error: Option<String>,
    #[serde(rename = "response_time_ms", serialize_with = "as_millis")]
    pub response_time: Duration,
    pub total_checks: u64,
    pub successful_checks: u64,
    pub failed_checks: u64,
    #[serde(rename = "average_response_time_ms", serialize_with = "as_millis")]
    pub average_response_time: Duration,
}

impl TargetHealth {
    /// A fresh record; targets start out healthy.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status: TargetStatus::Healthy,
            last_check: None,
            consecutive_fails: 0,
            consecutive_passes: 0,
            last_error: None,
            response_time: Duration::ZERO,
            total_checks: 0,
            successful_checks: 0,
            failed_checks: 0,
            average_response_time: Duration::ZERO,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == TargetStatus::Healthy
    }

    /// Apply a probe result. Returns the previous status if it changed.
    pub fn record(
        &mut self,
        probe: &ProbeResult,
        unhealthy_threshold: u32,
        healthy_threshold: u32,
    ) -> Option<TargetStatus> {
        self.last_check = Some(Utc::now());
        self.response_time = probe.response_time;
        self.total_checks += 1;

        // Running mean over all checks.
        let total = u128::from(self.total_checks);
        let mean_nanos = (self.average_response_time.as_nanos() * (total - 1)
            + probe.response_time.as_nanos())
            / total;
        self.average_response_time = Duration::from_nanos(mean_nanos as u64);

        let previous = self.status;

        if probe.success {
            self.consecutive_fails = 0;
            self.consecutive_passes += 1;
            self.successful_checks += 1;

            if self.status != TargetStatus::Healthy && self.consecutive_passes >= healthy_threshold {
                self.status = TargetStatus::Healthy;
            }
        } else {
            self.consecutive_passes = 0;
            self.consecutive_fails += 1;
            self.failed_checks += 1;
            self.last_error = Some(probe.error.clone().unwrap_or_else(|| "health check failed".to_string()));

            if self.status == TargetStatus::Healthy && self.consecutive_fails >= unhealthy_threshold {
                self.status = TargetStatus::Unhealthy;
            }
        }

        (previous != self.status).then_some(previous)
    }
}

fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}
