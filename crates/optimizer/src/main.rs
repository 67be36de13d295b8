//! Volume optimizer - block-volume cost optimization service
//!
//! Loads an inventory snapshot, serves analysis and remediation over HTTP,
//! and exposes health and Prometheus endpoints.

use anyhow::{Context, Result};
use optimizer_lib::{
    backend::{Backends, SnapshotBackend},
    health::HealthRegistry,
    observability::AuditLogger,
    Engine,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use volume_optimizer::{api, config::ServiceConfig};

const OPTIMIZER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting volume-optimizer");

    let config = ServiceConfig::load()?;
    info!(
        region = %config.engine.region,
        snapshot = %config.snapshot_path.display(),
        "Optimizer configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register_backends().await;

    let logger = AuditLogger::new(config.engine.region.clone());

    let backend = SnapshotBackend::load(&config.snapshot_path)
        .await
        .context("Failed to load inventory snapshot")?;
    logger.log_startup(OPTIMIZER_VERSION, "snapshot");

    let engine = Engine::new(config.engine.clone(), Backends::shared(Arc::new(backend)))
        .with_health(health_registry.clone());

    let app_state = Arc::new(api::AppState::new(Arc::new(engine), health_registry.clone()));

    // Backends are loaded, accept traffic
    health_registry.set_ready(true).await;

    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            logger.log_shutdown("SIGINT received");
        }
        served = api_handle => {
            match served {
                Ok(Ok(())) => logger.log_shutdown("API server stopped"),
                Ok(Err(e)) => {
                    error!(error = %e, "API server failed");
                    logger.log_shutdown("API server failed");
                    return Err(e);
                }
                Err(e) => {
                    logger.log_shutdown("API server task aborted");
                    return Err(e.into());
                }
            }
        }
    }

    info!("Shutting down");
    Ok(())
}
