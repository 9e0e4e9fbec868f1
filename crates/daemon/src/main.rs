//! LinkWard Engine - Main Entry Point
//! JSON-RPC control surface over the resumable maintenance job system

mod stages;

use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use linkward_api_rpc::{RpcServer, RpcServerConfig};
use linkward_core::application::{JobSystem, RunnerConfig, SystemConfig};
use linkward_core::port::{SystemTimeProvider, UuidProvider};
use linkward_infra_sqlite::{create_pool, run_migrations, SqliteDurableStore};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_DB_PATH: &str = "~/.linkward/linkward.db";

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize logging
    let log_format = std::env::var("LINKWARD_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("linkward=info"))
        .expect("Failed to create env filter");

    match log_format.as_str() {
        "json" => {
            // Production: JSON structured logging
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            // Development: pretty formatting with colors
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }

    info!("LinkWard Engine v{} starting...", VERSION);

    // 2. Load configuration
    let db_path = std::env::var("LINKWARD_DB_PATH")
        .unwrap_or_else(|_| shellexpand::tilde(DEFAULT_DB_PATH).into_owned());

    let rpc_port: u16 = std::env::var("LINKWARD_RPC_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(9419);

    info!(db_path = %db_path, "Initializing database...");

    // 3. Initialize database
    if let Some(parent) = std::path::Path::new(&db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let pool = create_pool(&format!("sqlite://{}", db_path))
        .await
        .map_err(|e| anyhow::anyhow!("DB pool creation failed: {}", e))?;
    run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;

    // 4. Setup dependencies (DI wiring)
    let time_provider = Arc::new(SystemTimeProvider);
    let backing = Arc::new(SqliteDurableStore::new(pool, time_provider.clone()));

    let system = Arc::new(JobSystem::new(
        backing,
        time_provider,
        Arc::new(UuidProvider),
        SystemConfig::new(RunnerConfig::new(stages::default_plan())),
    ));
    stages::register_default_stages(&system);

    // 5. Legacy migration, crash recovery, replay hydration
    info!("Running startup sequence...");
    system
        .startup()
        .await
        .map_err(|e| anyhow::anyhow!("Startup sequence failed: {}", e))?;

    // 6. Channel liveness sweeping
    let heartbeat_handle = system.spawn_heartbeat();

    // 7. Start JSON-RPC server
    info!("Starting JSON-RPC server...");
    let rpc_config = RpcServerConfig {
        port: rpc_port,
        ..Default::default()
    };
    let rpc_handle = RpcServer::new(rpc_config, system.clone())
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("RPC server start failed: {}", e))?;

    info!("System ready. Waiting for commands...");
    info!("Press Ctrl+C to shutdown");

    // 8. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received. Exiting gracefully...");

    // 9. Graceful shutdown: stop intake first, then flush pending writes
    rpc_handle
        .stop()
        .map_err(|e| anyhow::anyhow!("RPC server stop failed: {}", e))?;
    heartbeat_handle.abort();
    system.shutdown().await;

    info!("Shutdown complete.");

    Ok(())
}
