mod api;
mod config;

use backends::kv::{MetricStore, RedisHashStore};
use backends::TsdbClient;
use clap::Parser;
use config::Config;
use engine::{ClientPool, DirectQueryEngine, QueryService, SearchAliasCatalogue};
use metrics_exporter_statsd::StatsdBuilder;
use registry::{HttpConfigStore, RegistryStore, ReloadCoordinator};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "plexus", about = "Query-federation layer for time-series backends")]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = "plexus.yaml")]
    config: PathBuf,
}

#[derive(thiserror::Error, Debug)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Validation(#[from] config::ValidationError),

    #[error("initial registry load failed: {0}")]
    Source(#[from] registry::SourceError),

    #[error("cluster-metrics backend unavailable: {0}")]
    Backend(#[from] backends::BackendError),

    #[error("could not install metrics recorder: {0}")]
    Metrics(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn init_metrics(config: &Config) -> Result<(), StartupError> {
    if let Some(metrics_config) = &config.metrics {
        let recorder = StatsdBuilder::from(
            metrics_config.statsd_host.clone(),
            metrics_config.statsd_port,
        )
        .build(Some(metrics_config.prefix.as_str()))
        .map_err(|err| StartupError::Metrics(err.to_string()))?;
        metrics::set_global_recorder(recorder)
            .map_err(|err| StartupError::Metrics(err.to_string()))?;
    }

    shared::metrics_defs::describe_all(registry::metrics_defs::ALL_METRICS);
    shared::metrics_defs::describe_all(backends::metrics_defs::ALL_METRICS);
    shared::metrics_defs::describe_all(engine::metrics_defs::ALL_METRICS);
    Ok(())
}

async fn run(args: Args) -> Result<(), StartupError> {
    let config = Config::from_file(&args.config)?;
    config.validate()?;

    init_metrics(&config)?;

    let store = Arc::new(RegistryStore::new());
    let clients = ClientPool::new(store.clone());
    let service = QueryService::new(store.clone(), clients.clone());

    let source = Arc::new(HttpConfigStore::new(config.config_store.url.clone()));
    let catalogue = Arc::new(SearchAliasCatalogue::new(clients));
    let coordinator = Arc::new(ReloadCoordinator::new(
        store.clone(),
        source,
        catalogue,
        Duration::from_secs(config.alias_refresh_secs),
    ));
    coordinator.start().await?;
    tracing::info!("registry loaded, watch loops running");

    let direct = match &config.cluster_metrics {
        Some(cluster_metrics) => {
            let hash_store = RedisHashStore::connect(&cluster_metrics.redis_url).await?;
            let metric_store =
                MetricStore::new(Arc::new(hash_store), cluster_metrics.prefix.clone());
            Some(Arc::new(DirectQueryEngine::new(Arc::new(metric_store))))
        }
        None => None,
    };

    let tsdb = config.tsdb.as_ref().map(|tsdb_config| {
        Arc::new(TsdbClient::new(
            tsdb_config.address.clone(),
            tsdb_config.username.clone(),
            tsdb_config.password.clone(),
            tsdb_config.content_type.clone(),
            tsdb_config.chunk_size,
        ))
    });

    let state = api::AppState {
        store,
        service,
        direct,
        tsdb,
        query_timeout: Duration::from_secs(config.query_timeout_secs),
    };

    let listener = tokio::net::TcpListener::bind(format!(
        "{}:{}",
        config.listener.host, config.listener.port
    ))
    .await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cancel the watch loops and wait for them to exit.
    coordinator.stop().await;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "could not listen for shutdown signal");
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    if let Err(err) = run(args).await {
        tracing::error!(error = %err, "startup failed");
        std::process::exit(1);
    }
}
