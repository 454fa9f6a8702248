use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use k2d_adapter::{EngineAdapter, OperationExecutor};
use k2d_api::{AppState, OpenApiCache};
use k2d_core::config::{Config, StoreBackendKind};
use k2d_core::{controller, telemetry, token, version};
use k2d_store::{DiskStore, StoreBackend, VolumeStore};
use rustls::crypto::aws_lc_rs::default_provider;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tracing::info;

mod bootstrap;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    default_provider().install_default().unwrap();

    let config = Config::parse();
    telemetry::init(&config.log_level, config.log_format)?;
    info!(msg = "starting k2d", version = version::VERSION);

    let advertised = bootstrap::advertised_address(&config)?;
    let tls = bootstrap::ensure_tls_material(&config.data_path, advertised)?;
    let token = token::load_or_generate(&config.data_path.join("token"), config.secret.as_deref())?;

    let docker = k2d_adapter::connect(config.docker_client_timeout)?;
    let engine_version = docker.version().await?;
    info!(
        msg = "container engine reachable",
        version = engine_version.version.as_deref().unwrap_or("unknown"),
        api_version = engine_version.api_version.as_deref().unwrap_or("unknown"),
    );

    let store = Arc::new(match config.store_backend {
        StoreBackendKind::Disk => {
            StoreBackend::Disk(DiskStore::new(config.data_path.join("store")))
        }
        StoreBackendKind::Volume => {
            let store = VolumeStore::new(docker.clone(), &config.store_volume_copy_image_name);
            store.ensure_volumes().await?;
            StoreBackend::Volume(store)
        }
    });

    let adapter = Arc::new(EngineAdapter::new(
        docker,
        store,
        &config.data_path,
        advertised.to_string(),
    ));
    adapter.ping().await?;
    adapter.ensure_network(k2d_adapter::naming::DEFAULT_NAMESPACE).await?;
    adapter.ensure_system_secret(&token).await?;
    bootstrap::deploy_edge_agent(&adapter, &config).await?;

    let (operations_tx, operations_rx) = mpsc::unbounded_channel();
    let (batches_tx, batches_rx) = mpsc::unbounded_channel();
    let intake = controller::run_intake(operations_rx, batches_tx, config.operation_batch_max_size);
    let executor = controller::run_executor(batches_rx, OperationExecutor::new(adapter.clone()));

    let port = config.port;
    let state = AppState {
        adapter,
        operations: operations_tx,
        openapi: Arc::new(OpenApiCache::new()),
        token_digest: token::digest(&token),
        token,
        advertised_address: advertised.to_string(),
        port,
        config: Arc::new(config),
    };
    let app = k2d_api::router(state);

    let rustls_config = RustlsConfig::from_config(Arc::new(tls.server_config()?));
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let handle: Handle = Handle::new();
    tokio::spawn(drain_on_shutdown(handle.clone()));

    info!(msg = "listening", address = %addr, advertised = %advertised);
    let server = axum_server::bind_rustls(addr, rustls_config)
        .handle(handle)
        .serve(app.into_make_service());

    tokio::join!(intake, executor, server).2?;
    Ok(())
}

/// Wait for ctrl-c or SIGTERM, then drain in-flight requests before the
/// listener exits. Queued operations keep executing until the controller
/// channels close.
async fn drain_on_shutdown(handle: Handle) {
    let mut terminate =
        signal(SignalKind::terminate()).expect("failed to install SIGTERM signal handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = terminate.recv() => {},
    }
    info!(msg = "shutdown signal received, draining connections");
    handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
}
