use std::collections::BTreeMap;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::health::TargetHealth;
use crate::resilience::{BreakerStatus, State as BreakerState};

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub breakers: usize,
    pub open_breakers: usize,
    pub monitored_targets: usize,
    pub unhealthy_targets: usize,
}

#[derive(Debug, Serialize)]
pub struct TargetView {
    #[serde(flatten)]
    pub health: TargetHealth,
    pub in_flight: usize,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let breakers = state.selector.breakers().breaker_status();
    let targets = state.selector.targets_health();

    let open_breakers = breakers
        .values()
        .filter(|b| b.state == BreakerState::Open)
        .count();
    let unhealthy_targets = targets.values().filter(|t| !t.is_healthy()).count();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if open_breakers == 0 && unhealthy_targets == 0 {
            "operational"
        } else {
            "degraded"
        },
        uptime_secs: state.started_at.elapsed().as_secs(),
        breakers: breakers.len(),
        open_breakers,
        monitored_targets: targets.len(),
        unhealthy_targets,
    })
}

pub async fn get_breakers(State(state): State<AdminState>) -> Json<BTreeMap<String, BreakerStatus>> {
    Json(state.selector.breakers().breaker_status())
}

pub async fn get_targets(State(state): State<AdminState>) -> Json<BTreeMap<String, TargetView>> {
    let connections = state.selector.connections();
    let targets = state
        .selector
        .targets_health()
        .into_iter()
        .map(|(url, health)| {
            let in_flight = connections.in_flight(&url);
            (url, TargetView { health, in_flight })
        })
        .collect();
    Json(targets)
}
