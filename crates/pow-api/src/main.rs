//! # powd
//!
//! Starts the Powergate HTTP server over in-process devnet back-ends.
//! Settings come from `POW_*` environment variables (see
//! [`pow_api::config`]).

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use pow_api::config::ServerConfig;
use pow_api::state::AppState;
use pow_devnet::Devnet;
use pow_engine::Powergate;
use pow_store::{Datastore, MemDatastore, RedbDatastore, Stores};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env().context("reading configuration")?;
    tracing::info!(?config, "starting powd");

    let prometheus = if config.metrics_enabled {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("installing metrics recorder")?;
        pow_engine::metrics::register_metrics();
        pow_api::middleware::register_metrics();
        Some(handle)
    } else {
        None
    };

    let datastore: Arc<dyn Datastore> = match &config.data_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating data directory {}", dir.display()))?;
            let path = dir.join("powergate.redb");
            tracing::info!(path = %path.display(), "opening datastore");
            Arc::new(RedbDatastore::open(&path).context("opening datastore")?)
        }
        None => {
            tracing::warn!("no data directory configured; state is kept in memory");
            Arc::new(MemDatastore::new())
        }
    };
    let stores = Stores::open(datastore).context("opening stores")?;

    let devnet = Devnet::new(config.devnet_config()).context("building devnet")?;
    let devnet_tasks = devnet.spawn();

    let powergate = Powergate::new(stores, devnet.capabilities(), config.engine_config());
    powergate.start().context("starting scheduler")?;

    let mut state = AppState::new(powergate.clone(), config.clone());
    if let Some(handle) = prometheus {
        state = state.with_prometheus(handle);
    }
    let app = pow_api::app(state);

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    tracing::info!("powd listening on {}", config.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to listen for shutdown signal");
            }
            tracing::info!("shutdown requested");
        })
        .await
        .context("serving")?;

    powergate.shutdown(SHUTDOWN_GRACE).await;
    for task in devnet_tasks {
        task.abort();
    }
    tracing::info!("powd stopped");
    Ok(())
}
