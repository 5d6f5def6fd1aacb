use clap::Parser;
use colored::*;
use std::net::SocketAddr;
use tracing::info;

use claims_server::{create_app, ClaimsServer, ServerConfig};
use error_common::{PlatformError, Result};
use logger_redacted::init_logging;

/// Claims Engine HTTP Server
#[derive(Parser, Debug)]
#[command(name = "claims-server")]
#[command(about = "Claims adjudication and payment reconciliation API server")]
struct Args {
    /// Server bind address (overrides the config file)
    #[arg(long)]
    host: Option<String>,

    /// Server port (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Configuration file path
    #[arg(short, long, default_value = "claims-server.yaml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut config = ServerConfig::load(&args.config)?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if args.verbose {
        config.logging.level = "debug".to_string();
    }

    let _log_guard =
        init_logging(&config.logging).map_err(|e| PlatformError::ConfigError(e.to_string()))?;

    info!("{}", "Starting Claims Engine HTTP Server".bright_cyan());
    info!("Version: {}", env!("CARGO_PKG_VERSION").bright_white());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| PlatformError::ConfigError(format!("Invalid bind address: {}", e)))?;
    if config.is_production() && config.database_url.is_none() {
        tracing::warn!("Production environment without a database; claims will not survive a restart");
    }

    let server = ClaimsServer::new(config).await?;
    let app = create_app(server);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| PlatformError::NetworkError(format!("Failed to bind to {}: {}", addr, e)))?;

    info!("{}", format!("Claims server running on http://{}", addr).bright_green());
    info!("{}", format!("Health check available at: http://{}/health", addr).bright_blue());
    info!("{}", format!("API v1 available at: http://{}/api/v1", addr).bright_blue());

    axum::serve(listener, app)
        .await
        .map_err(|e| PlatformError::ServerError(format!("HTTP server error: {}", e)))?;

    Ok(())
}
