//! Cluster node binary.
//!
//! Loads configuration, joins the cluster store, and serves the configured
//! routes with sticky-session routing.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use sticky_cluster::cluster::{Coordinator, StartMode};
use sticky_cluster::config::{load_config, validate_config, ConfigError, NodeConfig};
use sticky_cluster::http::HttpServer;
use sticky_cluster::lifecycle::Shutdown;
use sticky_cluster::observability::{logging, metrics};
use sticky_cluster::resilience::RetryPolicy;
use sticky_cluster::store::open_store;

#[derive(Parser)]
#[command(name = "sticky-node")]
#[command(about = "Sticky-session cluster node", long_about = None)]
struct Args {
    /// Path to the TOML configuration file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Rejoin after a crash, keeping this node's persisted state and
    /// sticky mappings instead of starting clean.
    #[arg(long)]
    restart: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        // Defaults go through the same semantic checks; a clustering node
        // must not register a wildcard address as its identity.
        None => {
            let config = NodeConfig::default();
            validate_config(&config).map_err(ConfigError::Validation)?;
            config
        }
    };
    logging::init(&config.observability.log_level);

    tracing::info!(
        bind_address = %config.listener.bind_address,
        advertise_address = %config.advertise_address(),
        server_type = %config.cluster.server_type,
        routes = config.routes.len(),
        restart = args.restart,
        "configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "failed to parse metrics address"
            ),
        }
    }

    let coordinator = if config.cluster.enabled {
        let store = open_store(&config.database)?;
        let retry = RetryPolicy::new(
            config.retry.attempts,
            Duration::from_millis(config.retry.delay_ms),
        );
        let mode = if args.restart {
            StartMode::Restart
        } else {
            StartMode::Fresh
        };
        Some(Arc::new(Coordinator::join(
            store,
            &config.cluster.server_type,
            config.advertise_address(),
            mode,
            retry,
        )?))
    } else {
        tracing::warn!("clustering disabled, running standalone");
        None
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "listening for connections");

    // Ctrl+C fans out to the server and any future background tasks
    // through the broadcast channel.
    let shutdown = Shutdown::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
                shutdown.trigger();
            }
        }
    });

    let server = HttpServer::new(&config, coordinator);
    server.run(listener, &shutdown).await?;

    tracing::info!("shutdown complete");
    Ok(())
}
