//! Alert delivery.
//!
//! # Data Flow
//! ```text
//! TargetChecker transition
//!     → AlertSink::send_alert (never blocks)
//!     → throttle per (type, target)
//!     → bounded queue (dropped with a warning when full)
//!     → worker → every AlertChannel concurrently
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::AlertsConfig;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    TargetDown,
    TargetRecovered,
    HighErrorRate,
    SlowResponse,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::TargetDown => "target_down",
            AlertType::TargetRecovered => "target_recovered",
            AlertType::HighErrorRate => "high_error_rate",
            AlertType::SlowResponse => "slow_response",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: Severity,
    pub target: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Alert {
    pub fn new(
        alert_type: AlertType,
        severity: Severity,
        target: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            alert_type,
            severity,
            target: target.into(),
            message: message.into(),
            timestamp: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Receiver of alerts. Implementations must not block the caller.
pub trait AlertSink: Send + Sync {
    fn send_alert(&self, alert: Alert);
}

#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("failed to send webhook: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook returned status {0}")]
    Status(u16),
}

/// A destination for alerts.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, alert: &Alert) -> Result<(), AlertError>;
}

/// Writes alerts to the log at a level matching their severity.
#[derive(Debug, Default)]
pub struct LogChannel;

#[async_trait]
impl AlertChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        let alert_type = alert.alert_type.as_str();
        let metadata = serde_json::Value::Object(alert.metadata.clone());
        match alert.severity {
            Severity::Critical => tracing::error!(
                alert_type,
                target_url = %alert.target,
                %metadata,
                "{}", alert.message
            ),
            Severity::Warning => tracing::warn!(
                alert_type,
                target_url = %alert.target,
                %metadata,
                "{}", alert.message
            ),
            Severity::Info => tracing::info!(
                alert_type,
                target_url = %alert.target,
                %metadata,
                "{}", alert.message
            ),
        }
        Ok(())
    }
}

/// POSTs alerts as JSON to a webhook. Any non-2xx answer is an error.
#[derive(Debug, Clone)]
pub struct WebhookChannel {
    url: String,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(url: impl Into<String>) -> Result<Self, AlertError> {
        let client = reqwest::Client::builder().timeout(WEBHOOK_TIMEOUT).build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        let response = self.client.post(&self.url).json(alert).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AlertError::Status(status.as_u16()));
        }

        tracing::debug!(
            url = %self.url,
            alert_type = alert.alert_type.as_str(),
            "Alert sent via webhook"
        );
        Ok(())
    }
}

/// Throttles, queues and fans out alerts to the registered channels.
pub struct AlertManager {
    channels: Arc<RwLock<Vec<Arc<dyn AlertChannel>>>>,
    queue_tx: mpsc::Sender<Alert>,
    queue_rx: Mutex<Option<mpsc::Receiver<Alert>>>,
    last_sent: Mutex<HashMap<(AlertType, String), Instant>>,
    min_interval: Duration,
    shutdown: Shutdown,
    worker: Mutex<Option<JoinHandle<mpsc::Receiver<Alert>>>>,
}

impl AlertManager {
    pub fn new(config: &AlertsConfig) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_size.max(1));
        Self {
            channels: Arc::new(RwLock::new(Vec::new())),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            last_sent: Mutex::new(HashMap::new()),
            min_interval: Duration::from_secs(config.min_interval_secs),
            shutdown: Shutdown::new(),
            worker: Mutex::new(None),
        }
    }

    /// Build a manager with the log channel and, if configured, a webhook channel.
    pub fn from_config(config: &AlertsConfig) -> Result<Self, AlertError> {
        let manager = Self::new(config);
        manager.add_channel(Arc::new(LogChannel));
        if let Some(url) = &config.webhook_url {
            manager.add_channel(Arc::new(WebhookChannel::new(url.clone())?));
        }
        Ok(manager)
    }

    pub fn add_channel(&self, channel: Arc<dyn AlertChannel>) {
        tracing::info!(channel = channel.name(), "Added alert channel");
        self.channels.write().push(channel);
    }

    /// Spawn the delivery worker. Calling it while running is a no-op.
    pub fn start(&self) {
        let Some(mut queue) = self.queue_rx.lock().take() else {
            tracing::warn!("Alert manager already running");
            return;
        };

        let channels = self.channels.clone();
        let mut shutdown = self.shutdown.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.recv() => break,
                    Some(alert) = queue.recv() => deliver(&channels, &alert).await,
                }
            }

            // Flush what was queued before stop.
            while let Ok(alert) = queue.try_recv() {
                deliver(&channels, &alert).await;
            }
            queue
        });

        *self.worker.lock() = Some(handle);
        tracing::info!("Alert manager started");
    }

    /// Stop the worker after it delivers the alerts already queued.
    pub async fn stop(&self) {
        let Some(handle) = self.worker.lock().take() else {
            return;
        };

        self.shutdown.trigger();
        match handle.await {
            Ok(queue) => *self.queue_rx.lock() = Some(queue),
            Err(e) => tracing::error!(error = %e, "Alert worker panicked"),
        }
        tracing::info!("Alert manager stopped");
    }

    fn should_throttle(&self, alert: &Alert) -> bool {
        let mut last_sent = self.last_sent.lock();
        let key = (alert.alert_type, alert.target.clone());
        let now = Instant::now();

        match last_sent.get(&key) {
            Some(sent) if now.duration_since(*sent) < self.min_interval => true,
            _ => {
                last_sent.insert(key, now);
                false
            }
        }
    }
}

impl AlertSink for AlertManager {
    fn send_alert(&self, alert: Alert) {
        let alert_type = alert.alert_type.as_str();

        if self.should_throttle(&alert) {
            tracing::debug!(alert_type, target_url = %alert.target, "Alert throttled");
            metrics::record_alert(alert_type, "throttled");
            return;
        }

        match self.queue_tx.try_send(alert) {
            Ok(()) => metrics::record_alert(alert_type, "queued"),
            Err(_) => {
                tracing::warn!(alert_type, "Alert queue full, dropping alert");
                metrics::record_alert(alert_type, "dropped");
            }
        }
    }
}

async fn deliver(channels: &RwLock<Vec<Arc<dyn AlertChannel>>>, alert: &Alert) {
    let channels: Vec<Arc<dyn AlertChannel>> = channels.read().clone();

    let results = join_all(channels.iter().map(|channel| channel.send(alert))).await;

    for (channel, result) in channels.iter().zip(results) {
        match result {
            Ok(()) => metrics::record_alert(alert.alert_type.as_str(), "sent"),
            Err(e) => {
                metrics::record_alert(alert.alert_type.as_str(), "failed");
                tracing::error!(channel = channel.name(), error = %e, "Failed to send alert");
            }
        }
    }
}
