//! Granule discovery and tile API server.

use std::{env, net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use tile_api::config::ServiceConfig;
use tile_api::state::AppState;

#[derive(Parser, Debug)]
#[command(name = "tile-api")]
#[command(about = "Satellite granule discovery and raster tile server")]
struct Args {
    /// Listen address
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    listen: String,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// YAML configuration file
    #[arg(short, long, env = "TILE_API_CONFIG")]
    config: Option<PathBuf>,

    /// Number of tokio worker threads (default: number of CPU cores)
    #[arg(long)]
    worker_threads: Option<usize>,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
    runtime_builder.enable_all();

    let threads = args
        .worker_threads
        .or_else(|| env::var("TOKIO_WORKER_THREADS").ok().and_then(|s| s.parse().ok()));
    if let Some(threads) = threads {
        runtime_builder.worker_threads(threads);
    }

    let runtime = runtime_builder.build()?;
    runtime.block_on(async_main(args, threads))
}

async fn async_main(args: Args, worker_threads: Option<usize>) -> Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(level).json().finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(threads) = worker_threads {
        info!(threads, "Configured tokio worker threads");
    }

    let prometheus_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;
    info!("Prometheus metrics exporter initialized");

    let config = ServiceConfig::load(args.config.as_deref())?;
    info!(
        collection = %config.catalog.client.collection_id,
        cache = ?config.cache.backend,
        tile_size = config.raster.reader.tile_size,
        debug = config.debug.enabled,
        "Starting tile API server"
    );

    let state = Arc::new(AppState::new(config).await?);
    let app = tile_api::router(state, prometheus_handle);

    let addr: SocketAddr = args.listen.parse()?;
    info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
