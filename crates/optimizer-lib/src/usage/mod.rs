//! Disk usage acquisition
//!
//! A volume's filled percentage is obtained by trying an ordered list of
//! strategies and stopping at the first one that yields samples:
//! - host-agent filesystem telemetry
//! - a remote usage command against the root path (boot devices)
//! - a remote usage command against the resolved mount point (other devices)
//!
//! When every strategy fails the result is `Unavailable`. No value is ever
//! guessed.

pub mod device;
mod reachability;
pub mod remote;
mod strategy;

pub use reachability::{Reachability, ReachabilityCache};
pub use remote::RemoteCommandRunner;
pub use strategy::{MountRemoteStrategy, RootRemoteStrategy, TelemetryUsageStrategy};

use crate::backend::{async_trait, Backends, CommandStatus};
use crate::config::PollSettings;
use crate::error::BackendError;
use crate::models::{DiskUsage, DiskUsageSample, UsageSource};
use crate::telemetry::MetricWindow;
use thiserror::Error;
use tracing::debug;

/// Why a strategy produced no usage
#[derive(Debug, Error)]
pub enum AcquisitionError {
    /// Strategy does not handle this kind of device
    #[error("not applicable to device {0}")]
    NotApplicable(String),

    #[error("no usage telemetry reported")]
    NoTelemetry,

    #[error("instance {instance_id} unreachable: {reason}")]
    Unreachable { instance_id: String, reason: String },

    #[error("remote command ended with {status:?}: {stderr}")]
    CommandFailed { status: CommandStatus, stderr: String },

    #[error("remote command timed out after {0} status checks")]
    Timeout(u32),

    #[error("unparseable command output: {0:?}")]
    Unparseable(String),

    #[error("could not determine mount point for {0}")]
    NoMountPoint(String),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Inputs shared by all strategies for one lookup
pub struct UsageRequest<'a> {
    pub instance_id: &'a str,
    pub device: &'a str,
    pub window: &'a MetricWindow,
    pub reachability: &'a ReachabilityCache,
}

/// One way of obtaining disk usage
#[async_trait]
pub trait UsageStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn source(&self) -> UsageSource;

    async fn acquire(&self, request: &UsageRequest<'_>) -> Result<Vec<DiskUsageSample>, AcquisitionError>;
}

/// Ordered strategies, first success wins
pub struct AcquisitionChain {
    strategies: Vec<Box<dyn UsageStrategy>>,
}

impl AcquisitionChain {
    pub fn new(strategies: Vec<Box<dyn UsageStrategy>>) -> Self {
        Self { strategies }
    }

    /// Telemetry, then root remote command, then mount remote command
    pub fn standard(backends: &Backends, poll: PollSettings) -> Self {
        let runner = RemoteCommandRunner::new(backends.remote.clone(), poll);
        Self::new(vec![
            Box::new(TelemetryUsageStrategy::new(backends.telemetry.clone())),
            Box::new(RootRemoteStrategy::new(
                runner.clone(),
                backends.inventory.clone(),
                backends.remote.clone(),
            )),
            Box::new(MountRemoteStrategy::new(
                runner,
                backends.inventory.clone(),
                backends.remote.clone(),
            )),
        ])
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Disk usage for the device attached to an instance
    pub async fn get_disk_usage(&self, request: &UsageRequest<'_>) -> DiskUsage {
        let mut last_failure: Option<String> = None;

        for strategy in &self.strategies {
            match strategy.acquire(request).await {
                Ok(samples) => {
                    if let usage @ DiskUsage::Available { .. } =
                        DiskUsage::from_samples(samples, strategy.source())
                    {
                        debug!(
                            instance_id = %request.instance_id,
                            device = %request.device,
                            strategy = strategy.name(),
                            used_percent = ?usage.used_percent(),
                            "Acquired disk usage"
                        );
                        return usage;
                    }
                    last_failure = Some(format!("{}: no usable samples", strategy.name()));
                }
                Err(AcquisitionError::NotApplicable(_)) => {}
                Err(e) => {
                    debug!(
                        instance_id = %request.instance_id,
                        device = %request.device,
                        strategy = strategy.name(),
                        error = %e,
                        "Usage strategy failed"
                    );
                    last_failure = Some(format!("{}: {}", strategy.name(), e));
                }
            }
        }

        DiskUsage::unavailable(
            last_failure.unwrap_or_else(|| "no acquisition strategy applies".to_string()),
        )
    }
}
