//! HTTP server setup and the proxy handler.
//!
//! # Responsibilities
//! - Create the Axum router with the catch-all proxy handler
//! - Wire up middleware (tracing, timeout, request ID)
//! - Resolve the service, dispatch through the target selector with failover
//! - Map dispatch failures to gateway status codes
//! - Own the health checker and alert manager lifecycles
//! - Apply configuration reloads

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::{GatewayConfig, RetryConfig};
use crate::health::{AlertManager, TargetChecker};
use crate::health::alerts::AlertError;
use crate::http::request::{
    propagate_request_id_layer, request_id, set_request_id_layer, upstream_request,
};
use crate::http::response::error_response;
use crate::load_balancer::{DispatchError, TargetSelector};
use crate::observability::metrics;
use crate::resilience::backoff::Backoff;
use crate::resilience::retries::{is_retryable, AttemptFailure, RetryBudget};
use crate::resilience::BreakerManager;
use crate::routing::{RequestInfo, Router as ServiceRouter};

type HttpClient = Client<HttpConnector, Body>;

/// Errors raised while building the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to build health check client: {0}")]
    HealthClient(#[from] reqwest::Error),

    #[error("failed to set up alerts: {0}")]
    Alerts(#[from] AlertError),
}

/// Why one upstream attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("invalid upstream request: {0}")]
    Request(#[from] axum::http::Error),

    #[error("upstream request failed: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),

    #[error("upstream timed out after {0:?}")]
    Timeout(Duration),

    #[error("upstream answered {}", .0.status())]
    Status(Response),
}

impl UpstreamError {
    fn attempt_failure(&self) -> AttemptFailure {
        match self {
            UpstreamError::Request(_) | UpstreamError::Transport(_) => AttemptFailure::Transport,
            UpstreamError::Timeout(_) => AttemptFailure::Timeout,
            UpstreamError::Status(response) => AttemptFailure::Status(response.status()),
        }
    }
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<ArcSwap<ServiceRouter>>,
    pub selector: Arc<TargetSelector>,
    pub client: HttpClient,
    pub retry_config: RetryConfig,
    pub retry_budget: Arc<RetryBudget>,
    pub backoff: Backoff,
    pub upstream_timeout: Duration,
    pub max_body_size: usize,
}

impl AppState {
    /// Swap in the services of a reloaded configuration.
    pub fn apply_config(&self, config: &GatewayConfig) {
        self.router.store(Arc::new(ServiceRouter::new(&config.services)));
        self.selector.sync_services(&config.services);
    }
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    config: GatewayConfig,
    state: AppState,
    alerts: Arc<AlertManager>,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: GatewayConfig) -> Result<Self, ServerError> {
        let alerts = Arc::new(AlertManager::from_config(&config.alerts)?);
        let checker = Arc::new(TargetChecker::new(config.health_check.clone(), alerts.clone())?);
        let breakers = Arc::new(BreakerManager::new());

        let selector = Arc::new(TargetSelector::new(
            checker,
            breakers,
            config.circuit_breaker.clone(),
        ));
        selector.sync_services(&config.services);

        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        let state = AppState {
            router: Arc::new(ArcSwap::from_pointee(ServiceRouter::new(&config.services))),
            selector,
            client,
            retry_config: config.retries.clone(),
            retry_budget: Arc::new(RetryBudget::new(config.retries.budget_ratio, 10)),
            backoff: Backoff::from(&config.retries),
            upstream_timeout: Duration::from_secs(config.timeouts.request_secs),
            max_body_size: config.listener.max_body_size,
        };

        let router = Self::build_router(&config, state.clone());
        Ok(Self {
            router,
            config,
            state,
            alerts,
        })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.server_secs)))
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    /// Shared state, for the admin API.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn selector(&self) -> Arc<TargetSelector> {
        self.state.selector.clone()
    }

    /// Run the server until `shutdown` fires.
    ///
    /// Starts the alert manager and, if enabled, the health checker; both are
    /// stopped after the listener has drained.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, services = self.config.services.len(), "HTTP server starting");

        self.alerts.start();
        let checker = self.state.selector.checker().clone();
        if self.config.health_check.enabled {
            checker.start();
        } else {
            tracing::info!("Active health checks disabled");
        }

        let reload_state = self.state.clone();
        let reloader = tokio::spawn(async move {
            while let Some(config) = config_updates.recv().await {
                reload_state.apply_config(&config);
            }
        });

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await;

        reloader.abort();
        checker.stop().await;
        self.alerts.stop().await;

        tracing::info!("HTTP server stopped");
        result
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

/// Main proxy handler.
/// Resolves the service, then dispatches with failover across its targets.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start_time = Instant::now();
    let request_id = request_id(request.headers());
    let method = request.method().clone();

    let router = state.router.load_full();
    let Some(route) = router.match_request(&request) else {
        tracing::warn!(request_id = %request_id, path = %request.uri().path(), "No service matched");
        metrics::record_request("none", method.as_str(), 404, start_time);
        return error_response(StatusCode::NOT_FOUND, "no matching service", &request_id);
    };

    let service = route.service.clone();
    let path_and_query = match request.uri().query() {
        Some(query) => format!("{}?{}", route.upstream_path(request.uri().path()), query),
        None => route.upstream_path(request.uri().path()).into_owned(),
    };
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let (parts, body) = request.into_parts();
    let body: Bytes = match axum::body::to_bytes(body, state.max_body_size).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Request body rejected");
            metrics::record_request(&service.name, method.as_str(), 413, start_time);
            return error_response(StatusCode::PAYLOAD_TOO_LARGE, "request body too large", &request_id);
        }
    };

    let info = RequestInfo::new(&parts.headers, remote_addr);
    let timeout = service
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(state.upstream_timeout);
    let max_attempts = if state.retry_config.enabled {
        state.retry_config.max_attempts.max(1)
    } else {
        1
    };

    state.retry_budget.record_request();

    let mut tried: Vec<String> = Vec::new();
    let mut attempt = 0;

    loop {
        attempt += 1;

        let client = state.client.clone();
        let result = state
            .selector
            .dispatch(&service.name, &info, &tried, |target| {
                forward(client, target, &parts, &path_and_query, body.clone(), timeout)
            })
            .await;

        let err = match result {
            Ok(dispatched) => {
                let response = dispatched.value;
                tracing::debug!(
                    request_id = %request_id,
                    service = %service.name,
                    target = %dispatched.target,
                    canary = dispatched.canary,
                    status = %response.status(),
                    attempt,
                    "Request proxied"
                );
                metrics::record_request(&service.name, method.as_str(), response.status().as_u16(), start_time);
                return response;
            }
            Err(err) => err,
        };

        let failure = match &err {
            DispatchError::CircuitOpen { .. } | DispatchError::TooManyRequests { .. } => {
                Some(AttemptFailure::Rejected)
            }
            DispatchError::Upstream { error, .. } => Some(error.attempt_failure()),
            DispatchError::UnknownService(_) | DispatchError::NoTargets(_) => None,
        };

        tracing::warn!(
            request_id = %request_id,
            service = %service.name,
            attempt,
            error = %err,
            "Dispatch attempt failed"
        );

        if let Some(target) = err.target() {
            if !tried.iter().any(|t| t == target) {
                tried.push(target.to_string());
            }
        }

        let retry = attempt < max_attempts
            && failure.is_some_and(|f| is_retryable(&method, f))
            && state.retry_budget.can_retry();

        if retry {
            // A rejected call cost nothing upstream, so fail over immediately.
            if failure != Some(AttemptFailure::Rejected) {
                let delay = state.backoff.delay(attempt);
                tracing::info!(request_id = %request_id, attempt, delay = ?delay, "Retrying request");
                tokio::time::sleep(delay).await;
            }
            continue;
        }

        let response = failure_response(err, &request_id);
        metrics::record_request(&service.name, method.as_str(), response.status().as_u16(), start_time);
        return response;
    }
}

/// Send one attempt to `target`. Upstream 5xx answers are returned as errors
/// so the breaker counts them.
async fn forward(
    client: HttpClient,
    target: String,
    parts: &axum::http::request::Parts,
    path_and_query: &str,
    body: Bytes,
    timeout: Duration,
) -> Result<Response, UpstreamError> {
    let request = upstream_request(&target, &parts.method, &parts.headers, path_and_query, body)?;

    let response = tokio::time::timeout(timeout, client.request(request))
        .await
        .map_err(|_| UpstreamError::Timeout(timeout))??;

    let (parts, incoming) = response.into_parts();
    let response = Response::from_parts(parts, Body::new(incoming));

    if response.status().is_server_error() {
        return Err(UpstreamError::Status(response));
    }
    Ok(response)
}

fn failure_response(err: DispatchError<UpstreamError>, request_id: &str) -> Response {
    match err {
        DispatchError::UnknownService(_) => {
            error_response(StatusCode::NOT_FOUND, "no matching service", request_id)
        }
        DispatchError::NoTargets(_) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, "no targets available", request_id)
        }
        DispatchError::CircuitOpen { .. } => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, "circuit breaker open", request_id)
        }
        DispatchError::TooManyRequests { .. } => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, "too many requests", request_id)
        }
        DispatchError::Upstream { error, .. } => match error {
            // The upstream answered; pass its response through.
            UpstreamError::Status(response) => response.into_response(),
            UpstreamError::Timeout(_) => {
                error_response(StatusCode::GATEWAY_TIMEOUT, "upstream timed out", request_id)
            }
            UpstreamError::Request(_) | UpstreamError::Transport(_) => {
                error_response(StatusCode::BAD_GATEWAY, "upstream request failed", request_id)
            }
        },
    }
}
