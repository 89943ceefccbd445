//! `strata-server`: wires a `BlobAccess` stack together from configuration
//! and exposes the ByteStream/CAS/ActionCache/Capabilities gRPC edge.

mod assembly;
mod config;

use clap::Parser;
use config::StorageConfig;
use std::path::PathBuf;
use strata_grpc::reapi::action_cache_server::ActionCacheServer;
use strata_grpc::reapi::capabilities_server::CapabilitiesServer;
use strata_grpc::reapi::content_addressable_storage_server::ContentAddressableStorageServer;
use strata_grpc::bytestream::byte_stream_server::ByteStreamServer;
use strata_grpc::service::{ActionCacheService, ByteStreamService, CapabilitiesService, CasService};
use tracing::{info, instrument};
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "strata-server")]
#[command(about = "A layered content-addressable blob store speaking the Bazel Remote Execution API")]
#[command(version)]
struct Cli {
    /// Path to a TOML configuration file. Defaults are used for anything it omits.
    #[arg(short, long, env = "STRATA_CONFIG")]
    config: Option<PathBuf>,

    /// Override the gRPC listen address from the config file.
    #[arg(long, env = "STRATA_LISTEN_ADDR")]
    listen_addr: Option<String>,

    /// Output logs as JSON instead of the human-readable format.
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn load_config(cli: &Cli) -> miette::Result<StorageConfig> {
    let mut storage_config = match &cli.config {
        Some(path) => {
            let source = std::fs::read_to_string(path)
                .map_err(|e| miette::miette!("failed to read config file {}: {e}", path.display()))?;
            StorageConfig::from_toml(&source)
                .map_err(|e| miette::miette!("failed to parse config file {}: {e}", path.display()))?
        }
        None => StorageConfig::default(),
    };

    if let Some(listen_addr) = &cli.listen_addr {
        storage_config.listen_addr = listen_addr.clone();
    }

    Ok(storage_config)
}

#[tokio::main]
#[instrument(name = "strata_server_main")]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    if let Err(error) = run(cli).await {
        tracing::error!(%error, "strata-server exited with an error");
        return Err(error);
    }
    Ok(())
}

async fn run(cli: Cli) -> miette::Result<()> {
    let storage_config = load_config(&cli)?;

    let addr = storage_config
        .listen_addr
        .parse()
        .map_err(|e| miette::miette!("invalid listen_addr {}: {e}", storage_config.listen_addr))?;

    let blobs = assembly::build_stack(&storage_config)
        .await
        .map_err(|e| miette::miette!("failed to assemble blob store stack: {e}"))?;

    let advertised_host = storage_config
        .advertised_host
        .clone()
        .unwrap_or_else(|| storage_config.listen_addr.clone());

    let bytestream = ByteStreamServer::new(ByteStreamService::new(blobs.clone(), storage_config.chunk_size));
    let cas = ContentAddressableStorageServer::new(CasService::new(blobs.clone()));
    let action_cache = ActionCacheServer::new(
        ActionCacheService::new(blobs.clone()).with_advertised_host(advertised_host),
    );
    let capabilities =
        CapabilitiesServer::new(CapabilitiesService::new(storage_config.max_batch_total_size_bytes));

    info!(%addr, instance_name = %storage_config.instance_name, "starting strata-server");

    tonic::transport::Server::builder()
        .add_service(bytestream)
        .add_service(cas)
        .add_service(action_cache)
        .add_service(capabilities)
        .serve_with_shutdown(addr, shutdown_signal())
        .await
        .map_err(|e| miette::miette!("gRPC server error: {e}"))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(%e, "failed to install Ctrl+C handler; shutting down immediately");
        return;
    }
    info!("received shutdown signal, draining connections");
}
