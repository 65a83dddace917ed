//! API gateway binary.
//!
//! ```text
//!   client ──▶ router ──▶ canary ──▶ health filter ──▶ breaker filter ──▶ balancer
//!                                                                          │
//!   client ◀──────────────────── response ◀── circuit breaker ◀── target ◀─┘
//!
//!   background: health checker ──▶ alert manager ──▶ log / webhook
//! ```

use std::path::PathBuf;

use clap::Parser;

use api_gateway::config::{load_config, GatewayConfig};
use api_gateway::lifecycle::startup;
use api_gateway::observability::logging::init_logging;

#[derive(Parser)]
#[command(name = "api-gateway", version, about = "API gateway with circuit breaking, health checks and canary routing")]
struct Cli {
    /// Path to the TOML configuration file. Without it the gateway runs on defaults.
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "api-gateway starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        services = config.services.len(),
        health_checks = config.health_check.enabled,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    startup::run(config, cli.config.as_deref()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
