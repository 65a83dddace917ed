use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Management CLI for the API gateway admin API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "GATEWAY_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Overall gateway status
    Status,
    /// Circuit breaker states and counts
    Breakers {
        /// Only show breakers that are not closed
        #[arg(long)]
        tripped: bool,
    },
    /// Health of monitored targets
    Targets {
        /// Only show targets that are not healthy
        #[arg(long)]
        unhealthy: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let base = cli.url.trim_end_matches('/');
    let (path, filter): (&str, Option<(&str, &str)>) = match cli.command {
        Commands::Status => ("/admin/status", None),
        Commands::Breakers { tripped } => ("/admin/breakers", tripped.then_some(("state", "closed"))),
        Commands::Targets { unhealthy } => ("/admin/targets", unhealthy.then_some(("status", "healthy"))),
    };

    let res = client
        .get(format!("{}{}", base, path))
        .headers(headers)
        .send()
        .await?;

    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("{}", text);
        }
        std::process::exit(1);
    }

    let mut body: Value = res.json().await?;
    if let (Some((field, healthy_value)), Some(map)) = (filter, body.as_object_mut()) {
        map.retain(|_, entry| entry.get(field).and_then(Value::as_str) != Some(healthy_value));
    }

    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}
