//! pxotel collector
//!
//! Run with: cargo run
//!
//! Configuration comes from the environment, see `pxotel::config`. Log
//! filtering follows RUST_LOG when set; otherwise VERBOSE=true switches from
//! info to debug.

use std::sync::Arc;

use pxotel::adapter::{IdGenerator, RandomIdGenerator};
use pxotel::config::Config;
use pxotel::engine::{HttpQueryEngine, QueryEngine};
use pxotel::exporter::{Exporter, GrpcTransport};
use pxotel::pipeline::CollectionWorker;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    let default_filter = if config.verbose {
        "pxotel=debug"
    } else {
        "pxotel=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("pxotel {} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!("  Cluster: {} ({})", config.cluster_name, config.pixie_cluster_id);
    tracing::info!("  Query engine: {}", config.pixie_endpoint);
    tracing::info!("  OTLP endpoint: {}", config.otlp_endpoint);

    let resources = Arc::new(config.resource_helper()?);
    let ids: Arc<dyn IdGenerator> = Arc::new(RandomIdGenerator::new());
    let engine: Arc<dyn QueryEngine> = Arc::new(HttpQueryEngine::new(
        &config.pixie_endpoint,
        config.pixie_cluster_id.clone(),
        config.pixie_api_key.expose(),
    )?);
    let transport = GrpcTransport::new(&config.otlp_endpoint, config.license_key.expose())?;
    let exporter = Exporter::new(Arc::new(transport));

    let adapters = config.adapters(ids);
    if adapters.is_empty() {
        tracing::warn!("Every signal is disabled, nothing to collect");
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles: Vec<_> = adapters
        .into_iter()
        .map(|adapter| {
            tracing::info!(
                adapter = adapter.id(),
                interval = ?adapter.interval(),
                limit = ?adapter.limit(),
                "Starting worker"
            );
            tracing::debug!(adapter = adapter.id(), script = adapter.script(), "Worker script");
            CollectionWorker::new(
                adapter,
                Arc::clone(&engine),
                Arc::clone(&resources),
                exporter.clone(),
            )
            .start(shutdown_rx.clone())
        })
        .collect();

    wait_for_signal().await?;
    tracing::info!("Shutdown requested, draining {} workers", handles.len());
    shutdown_tx.send(true)?;

    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            tracing::error!(error = %e, "Worker task failed");
        }
    }

    tracing::info!("All workers stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
