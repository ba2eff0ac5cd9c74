use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use bucketgate::config::{AppConfig, Backend};
use bucketgate::http::HttpServer;
use bucketgate::ratelimit::RateLimiter;

/// Token bucket rate limiting in front of an HTTP service.
#[derive(Debug, Parser)]
#[command(name = "bucketgate", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// HTTP listen address, overrides the configuration
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Where bucket state lives, overrides the configuration
    #[arg(long, value_enum)]
    backend: Option<Backend>,

    /// Store URL for the Redis backend, overrides the configuration
    #[arg(long)]
    redis_url: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!("Starting Bucketgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(listen) = cli.listen {
        config.server.http_addr = listen;
    }
    if let Some(backend) = cli.backend {
        config.limiter.backend = backend;
    }
    if let Some(redis_url) = cli.redis_url {
        config.limiter.redis_url = redis_url;
    }
    info!(
        http_addr = %config.server.http_addr,
        backend = ?config.limiter.backend,
        "Configuration loaded"
    );

    let rate_limiter = Arc::new(RateLimiter::from_config(&config.limiter).await?);

    HttpServer::new(config.server.http_addr, rate_limiter)
        .serve_with_shutdown(shutdown_signal())
        .await?;

    info!("Bucketgate stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
