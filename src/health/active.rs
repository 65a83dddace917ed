//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every monitored target with `GET <url>/health`
//! - Apply results to each target's [`TargetHealth`]
//! - Emit one alert per status transition

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time;

use crate::config::HealthCheckConfig;
use crate::health::alerts::{Alert, AlertSink, AlertType, Severity};
use crate::health::state::{ProbeResult, TargetHealth, TargetStatus};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;

/// Probes targets and tracks their health.
pub struct TargetChecker {
    inner: Arc<CheckerInner>,
    shutdown: Shutdown,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct CheckerInner {
    config: HealthCheckConfig,
    targets: RwLock<HashMap<String, TargetHealth>>,
    client: reqwest::Client,
    alerts: Arc<dyn AlertSink>,
}

impl TargetChecker {
    /// Create a checker. Zero or empty config values are replaced with defaults.
    pub fn new(config: HealthCheckConfig, alerts: Arc<dyn AlertSink>) -> Result<Self, reqwest::Error> {
        let config = config.normalized();
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .danger_accept_invalid_certs(config.insecure_skip_verify)
            .user_agent("api-gateway-health-check")
            .build()?;

        Ok(Self {
            inner: Arc::new(CheckerInner {
                config,
                targets: RwLock::new(HashMap::new()),
                client,
                alerts,
            }),
            shutdown: Shutdown::new(),
            worker: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &HealthCheckConfig {
        &self.inner.config
    }

    /// Start monitoring `url`. Adding a monitored target again keeps its history.
    pub fn add_target(&self, url: &str) {
        let mut targets = self.inner.targets.write();
        if !targets.contains_key(url) {
            targets.insert(url.to_string(), TargetHealth::new(url));
            metrics::record_target_health(url, TargetStatus::Healthy);
            tracing::info!(url = %url, "Added target for health monitoring");
        }
    }

    pub fn remove_target(&self, url: &str) {
        if self.inner.targets.write().remove(url).is_some() {
            tracing::info!(url = %url, "Removed target from health monitoring");
        }
    }

    /// Make the monitored set equal to `urls`, keeping history of retained targets.
    pub fn sync_targets(&self, urls: &HashSet<String>) {
        let stale: Vec<String> = self
            .inner
            .targets
            .read()
            .keys()
            .filter(|url| !urls.contains(*url))
            .cloned()
            .collect();

        for url in stale {
            self.remove_target(&url);
        }
        for url in urls {
            self.add_target(url);
        }
    }

    /// Spawn the probe loop: one round immediately, then every interval.
    pub fn start(&self) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            tracing::warn!("Health checker already running");
            return;
        }

        let inner = self.inner.clone();
        let mut shutdown = self.shutdown.subscribe();

        tracing::info!(
            interval_ms = inner.config.interval_ms,
            timeout_ms = inner.config.timeout_ms,
            "Starting health checker"
        );

        *worker = Some(tokio::spawn(async move {
            let mut ticker = time::interval(inner.config.interval());
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => inner.check_all().await,
                }
            }
            tracing::debug!("Health check loop exited");
        }));
    }

    /// Stop the loop and wait for it to exit. A round already in flight completes first.
    pub async fn stop(&self) {
        let Some(handle) = self.worker.lock().take() else {
            return;
        };

        tracing::info!("Stopping health checker");
        self.shutdown.trigger();
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Health check loop panicked");
        }
    }

    /// Probe every monitored target once, concurrently.
    pub async fn check_all(&self) {
        self.inner.check_all().await;
    }

    /// Probe a single target without recording the result.
    pub async fn check_target(&self, url: &str) -> ProbeResult {
        self.inner.check_target(url).await
    }

    /// Apply a probe result to `url` and emit an alert if its status changed.
    pub fn record_result(&self, url: &str, probe: &ProbeResult) {
        self.inner.record_result(url, probe);
    }

    /// Whether `url` may receive traffic. Unmonitored targets are assumed healthy.
    pub fn is_healthy(&self, url: &str) -> bool {
        self.inner
            .targets
            .read()
            .get(url)
            .map_or(true, TargetHealth::is_healthy)
    }

    pub fn target_health(&self, url: &str) -> Option<TargetHealth> {
        self.inner.targets.read().get(url).cloned()
    }

    pub fn all_targets_health(&self) -> HashMap<String, TargetHealth> {
        self.inner.targets.read().clone()
    }
}

impl Drop for TargetChecker {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

impl CheckerInner {
    async fn check_all(&self) {
        let urls: Vec<String> = self.targets.read().keys().cloned().collect();

        let probes = urls.iter().map(|url| async move {
            let probe = self.check_target(url).await;
            self.record_result(url, &probe);
        });
        join_all(probes).await;
    }

    async fn check_target(&self, url: &str) -> ProbeResult {
        let start = Instant::now();

        let response = match self.client.get(health_url(url)).send().await {
            Ok(response) => response,
            Err(e) => return ProbeResult::failed(start.elapsed(), format!("health check failed: {}", e)),
        };
        let response_time = start.elapsed();

        let status = response.status().as_u16();
        if self.config.expected_status.contains(&status) {
            ProbeResult::passed(response_time)
        } else {
            ProbeResult::failed(response_time, format!("unexpected status code: {}", status))
        }
    }

    fn record_result(&self, url: &str, probe: &ProbeResult) {
        let alert = {
            let mut targets = self.targets.write();
            // Removed while the probe was in flight.
            let Some(target) = targets.get_mut(url) else {
                return;
            };

            let previous = target.record(
                probe,
                self.config.unhealthy_threshold,
                self.config.healthy_threshold,
            );
            metrics::record_target_health(url, target.status);

            match (previous, target.status) {
                (Some(_), TargetStatus::Unhealthy) => {
                    tracing::warn!(
                        url = %url,
                        fails = target.consecutive_fails,
                        error = target.last_error.as_deref().unwrap_or_default(),
                        "Target marked as unhealthy"
                    );
                    Some(
                        Alert::new(
                            AlertType::TargetDown,
                            Severity::Critical,
                            url,
                            format!("Target {} is down", url),
                        )
                        .with_metadata("error", target.last_error.clone().unwrap_or_default()),
                    )
                }
                (Some(TargetStatus::Unhealthy), TargetStatus::Healthy) => {
                    tracing::info!(
                        url = %url,
                        passes = target.consecutive_passes,
                        "Target recovered to healthy"
                    );
                    Some(Alert::new(
                        AlertType::TargetRecovered,
                        Severity::Info,
                        url,
                        format!("Target {} has recovered", url),
                    ))
                }
                (Some(from), to) => {
                    tracing::info!(url = %url, from = %from, to = %to, "Target status changed");
                    None
                }
                (None, _) => None,
            }
        };

        if let Some(alert) = alert {
            self.alerts.send_alert(alert);
        }
    }
}

/// Probe URL for a target: the base URL with exactly one `/` before `health`.
pub fn health_url(url: &str) -> String {
    format!("{}/health", url.trim_end_matches('/'))
}
