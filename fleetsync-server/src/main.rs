mod config;
mod db;
mod error;
mod exec;
mod models;
mod routes;
mod services;
mod state;
mod sync;
mod ws;

use crate::config::{AppConfig, FleetConfig};
use crate::db::connection::create_pool;
use crate::db::migrate::migrate;
use crate::exec::{LocalRunner, SshRunner};
use crate::services::host_status::start_status_service;
use crate::state::AppState;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .init();

    tracing::info!("Starting fleetsync on port {}", config.port);

    std::fs::create_dir_all(&config.data_dir)?;

    let fleet = FleetConfig::load(&config.fleet_config)?;
    tracing::info!(
        servers = fleet.servers.len(),
        roots = fleet.sync.roots.len(),
        "Loaded fleet from {}",
        config.fleet_config.display()
    );

    // Initialize database
    let db_path = config.db_path.to_string_lossy().to_string();
    let pool = create_pool(&db_path)?;
    migrate(&pool, &config.data_dir)?;

    let remote = Arc::new(SshRunner::new(fleet.sync.ssh_key_path.clone()));
    let local = Arc::new(LocalRunner);
    let state = Arc::new(AppState::new(pool, fleet, remote, local));

    let cancel = CancellationToken::new();
    start_status_service(state.clone(), cancel.clone());

    let app = routes::create_router(state.clone());

    let addr = format!("{}:{}", config.bind_addr, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    tracing::info!("Shutting down...");
    cancel.cancel();

    db::connection::close_pool(&state.db);
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl+c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }

    cancel.cancel();
}
