//! Decision engine for block-volume cost optimization
//!
//! This crate provides the core functionality for:
//! - Monthly cost estimation from per-region price tables
//! - Idle and overprovisioned volume detection
//! - Disk usage acquisition from telemetry and remote commands
//! - Guarded remediation (snapshot, delete, class change, resize)
//! - Health checks and observability

pub mod analyzer;
pub mod backend;
pub mod config;
pub mod detector;
pub mod error;
pub mod executor;
pub mod health;
pub mod models;
pub mod observability;
pub mod pricing;
pub mod telemetry;
pub mod usage;

#[cfg(test)]
mod testing;

pub use analyzer::Engine;
pub use backend::{Backends, SnapshotBackend};
pub use config::EngineConfig;
pub use error::{BackendError, EngineError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{AuditLogger, OptimizerMetrics};
pub use pricing::{CostEstimate, PriceTable};
