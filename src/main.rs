use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tollgate::config::{LoggingConfig, StoreBackend, TollgateConfig};
use tollgate::http::HttpServer;
use tollgate::ratelimit::TokenBucketLimiter;
use tollgate::store::{BucketStore, MemoryStore, RedisStore};

/// Token bucket rate limiting in front of an HTTP resource.
#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the HTTP listen address
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = TollgateConfig::load(cli.config.as_deref())?;
    if let Some(addr) = cli.listen {
        config.server.http_addr = addr;
    }
    if cli.log_json {
        config.logging.json = true;
    }

    init_tracing(&config.logging);

    info!("Starting Tollgate Rate Limiting Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        http_addr = %config.server.http_addr,
        capacity = config.limiter.capacity,
        rate = config.limiter.rate,
        store = ?config.store.backend,
        "Configuration loaded"
    );

    match config.store.backend {
        StoreBackend::Redis => {
            let store = RedisStore::connect(&config.store.url).await?;
            run(config, Arc::new(store)).await
        }
        StoreBackend::Memory => run(config, Arc::new(MemoryStore::new())).await,
    }
}

/// Build the limiter over `store` and serve until a shutdown signal arrives.
async fn run<S: BucketStore + 'static>(config: TollgateConfig, store: Arc<S>) -> anyhow::Result<()> {
    store.ping().await?;

    let limiter = TokenBucketLimiter::with_policy(store, config.limiter.policy()?)
        .with_key_prefix(config.limiter.key_prefix.clone());
    info!(ttl_secs = limiter.policy().ttl().as_secs(), "Rate limiter initialized");

    HttpServer::from_config(&config.server, Arc::new(limiter))
        .serve_with_shutdown(shutdown_signal())
        .await?;

    info!("Tollgate Rate Limiting Service stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
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
