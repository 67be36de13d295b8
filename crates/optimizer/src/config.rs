//! Service configuration

use anyhow::{Context, Result};
use optimizer_lib::config::EngineConfig;
use serde::Deserialize;
use std::path::PathBuf;

/// Service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// API server port for analysis, health and metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Inventory snapshot replayed by the in-memory backend
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,

    /// Detection thresholds, pricing and concurrency
    #[serde(default)]
    pub engine: EngineConfig,
}

fn default_api_port() -> u16 {
    8080
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("snapshot.json")
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            snapshot_path: default_snapshot_path(),
            engine: EngineConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from the optional `OPTIMIZER_CONFIG` file and the
    /// environment (`OPTIMIZER_ENGINE__REGION=eu-west-1` and so on)
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Ok(path) = std::env::var("OPTIMIZER_CONFIG") {
            builder = builder.add_source(config::File::with_name(&path));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("OPTIMIZER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?;

        config
            .try_deserialize()
            .context("Invalid service configuration")
    }
}
