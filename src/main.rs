//! livemux Binary Entry Point
//!
//! Loads the configuration, starts the peer set and the listeners, and
//! reloads the peer set on SIGHUP.
//! Core functionality is provided by the `livemux` library crate.

use std::sync::Arc;

use clap::Parser;
use livemux::{
    config::AppConfig,
    peer::{PeerSetManager, livestatus_factory},
    query::QueryExecutor,
    server::{AppState, LineListener, create_router},
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// livemux - caching multiplexer for Livestatus queries
#[derive(Parser, Debug)]
#[command(name = "livemux", version, about, long_about = None)]
struct Cli {
    /// Configuration files, merged in the given order
    #[arg(
        short,
        long,
        default_value = "configs/livemux.yaml",
        env = "LIVEMUX_CONFIG",
        value_delimiter = ','
    )]
    config: Vec<String>,

    /// Additional listen addresses (host:port or socket path)
    #[arg(long)]
    listen: Vec<String>,

    /// Log level (overrides config file)
    #[arg(long, env = "LIVEMUX_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Cli {
    fn load_config(&self) -> Result<AppConfig, livemux::config::ConfigError> {
        let mut config = AppConfig::load(self.config.as_slice())?;
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        config.listen.extend(self.listen.iter().cloned());
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse CLI arguments and load configuration before logging so the
    // configured level applies from the first line.
    let cli = Cli::parse();
    let config = cli.load_config()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("livemux - Livestatus multiplexer");
    tracing::info!(
        files = ?cli.config,
        peers = config.connections.len(),
        refresh = %humantime::format_duration(config.refresh.refresh_interval),
        full_refresh = %humantime::format_duration(config.refresh.full_refresh_interval),
        "Configuration loaded"
    );

    if config.listen.is_empty() && config.http_listen.is_none() {
        return Err("no listen address configured".into());
    }

    // Start peers
    let peers = Arc::new(PeerSetManager::new(livestatus_factory()));
    peers.reload(&config.connections, config.refresh);
    let executor = QueryExecutor::new(peers.clone());

    // Start listeners
    let shutdown = CancellationToken::new();
    let mut listeners = tokio::task::JoinSet::new();
    for addr in &config.listen {
        let listener = LineListener::bind(addr).await?;
        listeners.spawn(listener.serve(executor.clone(), shutdown.clone()));
    }

    if let Some(addr) = &config.http_listen {
        let app = create_router(AppState {
            executor: executor.clone(),
        });
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("HTTP API listening on: http://{}", listener.local_addr()?);
        let token = shutdown.clone();
        listeners.spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(token.cancelled_owned())
                .await;
            if let Err(e) = served {
                tracing::error!(error = %e, "HTTP server failed");
            }
        });
    }

    tracing::info!("Press Ctrl+C to shutdown");

    tokio::spawn(reload_on_hangup(cli, peers.clone()));

    shutdown_signal().await;
    shutdown.cancel();
    while listeners.join_next().await.is_some() {}

    tracing::info!("Shutting down peers...");
    peers.shutdown().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Re-read the configuration and reload the peer set on every SIGHUP.
///
/// A configuration that fails to load leaves the running peer set untouched.
#[cfg(unix)]
async fn reload_on_hangup(cli: Cli, peers: Arc<PeerSetManager>) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            tracing::error!(error = %e, "Failed to install SIGHUP handler");
            return;
        }
    };

    while hangup.recv().await.is_some() {
        tracing::info!("Received hangup signal, reloading configuration");
        match cli.load_config() {
            Ok(config) => {
                peers.reload(&config.connections, config.refresh);
            }
            Err(e) => {
                tracing::error!(error = %e, "Reload failed, keeping running configuration");
            }
        }
    }
}

#[cfg(not(unix))]
async fn reload_on_hangup(_cli: Cli, _peers: Arc<PeerSetManager>) {}

/// Setup graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
