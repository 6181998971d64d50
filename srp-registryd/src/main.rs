mod config;
mod snapshot;
mod registry_manager;
mod mdns;
mod api;

use std::net::SocketAddr;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use mdns_sd::ServiceDaemon;
use anyhow::{Context, Result};
use srp_registry::Registry;
use crate::config::Config;
use crate::registry_manager::{RegistryHandle, RegistryStatus};
use crate::snapshot::db::SnapshotDb;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    tracing_subscriber::EnvFilter::new("srp_registryd=info,srp_registry=info")
                })
        )
        .init();

    tracing::info!("Starting srp-registryd");

    // Load config
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/srp-registry/registryd.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    tracing::info!("Loaded config from {}", config_path);

    // Snapshot database; registrations never survive a restart, only the
    // last snapshot's hash is reported
    let db = SnapshotDb::open(&config.snapshot.db_path)?;
    tracing::info!("Opened snapshot database at {:?}", config.snapshot.db_path);
    if let Some(previous) = db.last_hash()? {
        tracing::info!(
            "Previous snapshot {}: {} hosts, {} services",
            previous,
            db.load_hosts()?.len(),
            db.load_services()?.len()
        );
    }

    let mut registry = Registry::new(config.registry_options())
        .context("Invalid registry configuration")?;
    registry.set_enabled(config.registry.enabled);

    let (hash_tx, hash_rx) = watch::channel(String::new());
    let (status_tx, status_rx) = watch::channel(RegistryStatus::of(&registry));

    // Start registry thread
    let registry_handle = RegistryHandle::spawn(registry, db, hash_tx, status_tx);

    // Create mDNS daemon bound to configured interface
    let mdns_daemon = ServiceDaemon::new()
        .context("Failed to create mDNS daemon")?;
    mdns_daemon
        .disable_interface(mdns_sd::IfKind::All)
        .context("Failed to disable default interfaces")?;
    mdns_daemon
        .enable_interface(config.registry.interface.as_str())
        .with_context(|| format!("Failed to enable interface {}", config.registry.interface))?;

    let listen: SocketAddr = config.api.listen
        .parse()
        .with_context(|| format!("Invalid listen address {}", config.api.listen))?;

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Spawn mDNS advertiser task
    let adv_cancel = cancel.clone();
    let adv_daemon = mdns_daemon.clone();
    let adv_config = config.registry.clone();
    let adv_status = status_rx.clone();
    let adv_handle = tokio::spawn(async move {
        if let Err(e) = mdns::advertise::run_advertiser(
            adv_daemon,
            adv_config,
            listen.port(),
            adv_status,
            adv_cancel,
        )
        .await
        {
            tracing::error!("mDNS advertiser error: {}", e);
        }
    });

    // Spawn expiry task
    let exp_cancel = cancel.clone();
    let exp_config = config.snapshot.clone();
    let exp_registry = registry_handle.clone();
    let exp_handle = tokio::spawn(async move {
        if let Err(e) = registry_manager::run(exp_registry, exp_config, exp_cancel).await {
            tracing::error!("Expiry loop error: {}", e);
        }
    });

    // Build API router
    let app_state = api::routes::AppState {
        registry: registry_handle.clone(),
        hash_rx,
        status_rx,
    };
    let app = api::routes::router(app_state);

    // Bind HTTP server
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind to {}", listen))?;

    tracing::info!("API listening on {}", listen);

    // Run server with graceful shutdown
    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    // Trigger cancellation
    cancel.cancel();

    // Wait for all tasks to complete; the advertiser withdraws itself
    let _ = tokio::join!(adv_handle, exp_handle, server_handle);

    // Shutdown registry thread
    if let Err(e) = registry_handle.shutdown().await {
        tracing::error!("Failed to shutdown registry: {}", e);
    }

    // Shutdown mDNS daemon
    if let Err(e) = mdns_daemon.shutdown() {
        tracing::error!("Failed to shutdown mDNS daemon: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
