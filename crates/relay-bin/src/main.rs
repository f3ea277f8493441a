// ============================
// relay-bin/src/main.rs
// ============================
//! Cloakroom relay server entry point.
use relay_lib::config::Settings;
use relay_lib::keepalive;
use relay_lib::storage::{FirestoreStorage, FlatFileStorage, Storage};
use relay_lib::{ws_router, AppState};
use std::fs;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .init();

    info!("Starting Cloakroom relay server...");

    let settings = Settings::load()?;
    debug!("Configuration loaded: {:?}", settings);

    fs::create_dir_all(&settings.storage.data_path)?;
    fs::create_dir_all(&settings.storage.uploads_path)?;
    debug!("Data directories created");

    // FIREBASE_SERVICE_ACCOUNT selects the cloud document store; absence
    // selects the local snapshot file
    let storage: Arc<dyn Storage> = match Settings::service_account_json() {
        Some(raw) => Arc::new(FirestoreStorage::from_service_account_json(&raw)?),
        None => Arc::new(FlatFileStorage::new(&settings.storage.data_path)?),
    };
    info!(backend = storage.name(), "persistence backend selected");

    if let Some(external_url) = Settings::external_url() {
        info!(%external_url, "keep-alive probe enabled");
        keepalive::spawn_keepalive(external_url, settings.relay.keepalive_interval_secs);
    }

    let addr = format!("{}:{}", settings.server.host, settings.server.port);

    let state = AppState::new(storage, settings).await?;
    info!(rooms = state.rooms.len(), "application state initialized");

    let app = ws_router::create_router(state.clone());
    let listener = TcpListener::bind(&addr).await?;
    info!("Server listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // final save so nothing in the coalescer window is lost
    info!("Shutting down; flushing pending snapshots");
    state.coalescer.flush().await;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
