use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod accrual;
mod agent;
mod config;
mod metrics;
mod models;
mod storage;
mod utils;

#[cfg(test)]
mod testsupport;

use accrual::AccrualClient;
use agent::Agent;
use config::Config;
use metrics::Metrics;
use storage::PgAgentStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with environment-based filtering
    // Default to INFO level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,accrual_sync=debug")),
        )
        .init();

    let conf = Config::from_env()?;
    tracing::info!(
        oracle = %conf.accrual_address,
        "Starting accrual synchronization service"
    );

    let store = Arc::new(PgAgentStore::connect(&conf.database_uri).await?);
    tracing::info!("Connected to Postgres");

    let metrics = Arc::new(Metrics::new()?);

    // Serve /metrics and /health from a dedicated thread with its own
    // runtime so the exposition stack stays out of the pipeline's way.
    let metrics_registry = Arc::new(metrics.registry().clone());
    let metrics_address = conf.metrics_address.clone();
    std::thread::spawn(move || {
        let rt = match tokio::runtime::Runtime::new() {
            Ok(rt) => rt,
            Err(e) => {
                tracing::error!(error = %e, "Failed to build metrics runtime");
                return;
            }
        };
        rt.block_on(async {
            if let Err(e) = metrics::start_metrics_server(metrics_registry, metrics_address).await
            {
                tracing::error!(error = %e, "Metrics server error");
            }
        });
    });

    let client = AccrualClient::new(&conf.accrual_address, conf.agent.client_timeout)?;

    let cancel = CancellationToken::new();
    let handle = Agent::new(store, client, conf.agent.clone(), metrics).start(cancel.clone());

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, draining pipeline");

    cancel.cancel();
    handle.join().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
