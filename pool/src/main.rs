// Coinpool daemon: job lifecycle, share validation and block submission
//
// Stratum transport, vardiff and payouts live in other processes; they
// consume the events logged here through the library API.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{http::{header, StatusCode}, response::IntoResponse, routing::get};
use clap::Parser;
use coinpool::config::PoolConfig;
use coinpool::daemon::{DaemonInterface, DaemonRpc};
use coinpool::jobs::{EquihashFamily, ProtocolFamily, StandardFamily};
use coinpool::metrics::prometheus as metrics;
use coinpool::{Pool, PoolEvent};
use coinpool_core::{AlgorithmFamily, AlgorithmRegistry};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "coinpool", about = "Mining pool job manager")]
struct Args {
    /// Pool config (JSON). Falls back to COINPOOL_CONFIG / pool_config.json.
    #[arg(short, long)]
    config: Option<String>,
}

async fn api_metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        metrics::render(),
    )
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("SIGTERM, shutting down"),
                    _ = tokio::signal::ctrl_c() => tracing::info!("SIGINT, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!("Could not register SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Ctrl+C, shutting down");
    }
}

/// Print pool events until the channel closes.
async fn log_events(mut rx: broadcast::Receiver<PoolEvent>) {
    loop {
        match rx.recv().await {
            Ok(PoolEvent::Started) => tracing::info!("Pool started"),
            Ok(PoolEvent::NewJob { params, clean_jobs }) => {
                tracing::debug!("Job {} broadcast (clean={})", params.first().cloned().unwrap_or_default(), clean_jobs)
            }
            Ok(PoolEvent::Share { valid_share, valid_block, share }) => {
                if valid_block {
                    tracing::info!("Block found by {} at height {:?}", share.worker, share.height);
                } else if !valid_share {
                    tracing::debug!("Invalid share from {}: {:?}", share.worker, share.error);
                }
            }
            // Already traced by the pool.
            Ok(PoolEvent::Log { .. }) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => tracing::warn!("Event log lagged by {} events", n),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn run<F: ProtocolFamily>(config: Arc<PoolConfig>, daemon: Arc<dyn DaemonRpc>) -> Result<()> {
    let (events, rx) = broadcast::channel(1024);
    tokio::spawn(log_events(rx));

    let registry = AlgorithmRegistry::new();
    let _pool = Pool::<F>::launch(config.clone(), daemon, &registry, events).await?;

    match &config.metrics_listen {
        Some(listen) => {
            let app = axum::Router::new().route("/metrics", get(api_metrics));
            let listener = tokio::net::TcpListener::bind(listen)
                .await
                .with_context(|| format!("failed to bind metrics listener {}", listen))?;
            tracing::info!("Metrics listening on {}", listen);
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
        None => shutdown_signal().await,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => PoolConfig::load_from(path)?,
        None => PoolConfig::load()?,
    };
    let config = Arc::new(config);
    let daemon: Arc<dyn DaemonRpc> = Arc::new(DaemonInterface::new(&config.daemons)?);

    tracing::info!(
        "Starting coinpool v{} for {} ({})",
        env!("CARGO_PKG_VERSION"),
        config.coin.name,
        config.coin.algorithm
    );

    match config.family()? {
        AlgorithmFamily::Standard => run::<StandardFamily>(config, daemon).await?,
        AlgorithmFamily::Equihash => run::<EquihashFamily>(config, daemon).await?,
    }

    tracing::info!("Coinpool shut down cleanly");
    Ok(())
}
