//! vigild: recording lifecycle daemon.
//!
//! Wires the reconciliation engine and the upload reaper to Postgres and the
//! media engine, then runs until interrupted.

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vigil_core::VigilConfig;
use vigil_db::{CameraRepository, RecordingRepository};
use vigil_services::{MediaEngineClient, RecordingMonitor, UploadReaper};

fn init_telemetry() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "vigil=debug,vigild=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn setup_database(config: &VigilConfig) -> Result<PgPool> {
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(config.db_timeout_seconds))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!(
        max_connections = config.db_max_connections,
        "Database connected"
    );

    let migrations_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../migrations");
    let migrator = sqlx::migrate::Migrator::new(migrations_dir)
        .await
        .context("Failed to load migrations")?;
    migrator
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    Ok(pool)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_telemetry();

    let config = VigilConfig::from_env().context("Invalid configuration")?;
    tracing::info!(
        environment = %config.environment,
        storage_root = %config.storage_root.display(),
        engine_api_url = %config.engine_api_url,
        "Starting vigild"
    );

    let pool = setup_database(&config).await?;

    let recordings = Arc::new(RecordingRepository::new(pool.clone()));
    let cameras = Arc::new(CameraRepository::new(pool.clone()));
    let engine = Arc::new(MediaEngineClient::new(
        &config.engine_api_url,
        &config.engine_secret,
        &config.engine_app,
        config.engine_schemas.clone(),
    ));

    let monitor = Arc::new(RecordingMonitor::new(
        config.clone(),
        recordings.clone(),
        cameras,
        engine,
    ));
    let reaper = Arc::new(UploadReaper::new(config.clone(), recordings));

    monitor.start().await;
    reaper.start().await;
    tracing::info!("vigild running, press Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    monitor.stop().await;
    reaper.stop().await;
    pool.close().await;
    tracing::info!("vigild stopped");

    Ok(())
}
