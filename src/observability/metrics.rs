//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by service, method, status
//! - `gateway_request_duration_seconds` (histogram): end-to-end latency by service
//! - `gateway_target_health` (gauge): 1=healthy, 0=unhealthy, per target
//! - `gateway_breaker_state` (gauge): 0=closed, 1=half-open, 2=open, per breaker
//! - `gateway_breaker_transitions_total` (counter): by breaker, from, to
//! - `gateway_breaker_rejections_total` (counter): by breaker, reason
//! - `gateway_canary_decisions_total` (counter): by service, decision
//! - `gateway_alerts_total` (counter): by alert type, outcome
//!
//! Recording before [`init_metrics`] is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::health::state::TargetStatus;
use crate::resilience::circuit_breaker::State;

/// Install the Prometheus recorder and its scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    let builder = PrometheusBuilder::new().with_http_listener(addr);

    if let Err(e) = builder.install() {
        tracing::error!(error = %e, "Failed to install Prometheus recorder");
        return;
    }

    describe_counter!("gateway_requests_total", "Total requests handled by the gateway");
    describe_histogram!(
        "gateway_request_duration_seconds",
        "End-to-end request latency in seconds"
    );
    describe_gauge!("gateway_target_health", "Target health (1 = healthy, 0 = unhealthy)");
    describe_gauge!(
        "gateway_breaker_state",
        "Circuit breaker state (0 = closed, 1 = half-open, 2 = open)"
    );
    describe_counter!(
        "gateway_breaker_transitions_total",
        "Circuit breaker state transitions"
    );
    describe_counter!(
        "gateway_breaker_rejections_total",
        "Calls rejected by an open or saturated circuit breaker"
    );
    describe_counter!("gateway_canary_decisions_total", "Canary routing decisions");
    describe_counter!("gateway_alerts_total", "Alerts by type and delivery outcome");

    tracing::info!(address = %addr, "Metrics exporter listening");
}

pub fn record_request(service: &str, method: &str, status: u16, start: Instant) {
    let labels = [
        ("service", service.to_string()),
        ("method", method.to_string()),
        ("status", status.to_string()),
    ];
    counter!("gateway_requests_total", &labels).increment(1);
    histogram!("gateway_request_duration_seconds", "service" => service.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_target_health(target: &str, status: TargetStatus) {
    let value = if status == TargetStatus::Healthy { 1.0 } else { 0.0 };
    gauge!("gateway_target_health", "target" => target.to_string()).set(value);
}

pub fn record_breaker_state(breaker: &str, state: State) {
    let value = match state {
        State::Closed => 0.0,
        State::HalfOpen => 1.0,
        State::Open => 2.0,
    };
    gauge!("gateway_breaker_state", "breaker" => breaker.to_string()).set(value);
}

pub fn record_breaker_transition(breaker: &str, from: State, to: State) {
    counter!(
        "gateway_breaker_transitions_total",
        "breaker" => breaker.to_string(),
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
    record_breaker_state(breaker, to);
}

pub fn record_breaker_rejection(breaker: &str, reason: &'static str) {
    counter!(
        "gateway_breaker_rejections_total",
        "breaker" => breaker.to_string(),
        "reason" => reason
    )
    .increment(1);
}

pub fn record_canary_decision(service: &str, canary: bool) {
    let decision = if canary { "canary" } else { "primary" };
    counter!(
        "gateway_canary_decisions_total",
        "service" => service.to_string(),
        "decision" => decision
    )
    .increment(1);
}

pub fn record_alert(alert_type: &'static str, outcome: &'static str) {
    counter!("gateway_alerts_total", "type" => alert_type, "outcome" => outcome).increment(1);
}
