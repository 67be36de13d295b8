//! Usage acquisition strategies

use super::device::{
    guess_mount_point, is_boot_device, select_filesystem_path, windows_drive_letter,
};
use super::remote::{
    mount_lookup_script, parse_df_output, parse_mount_point, parse_windows_usage,
    posix_usage_script, windows_usage_script, RemoteCommandRunner,
};
use super::{AcquisitionError, Reachability, UsageRequest, UsageStrategy};
use crate::backend::{async_trait, InventoryService, RemoteExecService, TelemetryService};
use crate::models::{DiskUsageSample, Platform, UsageSource};
use crate::telemetry::{MetricName, MetricTarget};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

/// Filesystem usage reported by the host agent
pub struct TelemetryUsageStrategy {
    telemetry: Arc<dyn TelemetryService>,
}

impl TelemetryUsageStrategy {
    pub fn new(telemetry: Arc<dyn TelemetryService>) -> Self {
        Self { telemetry }
    }
}

#[async_trait]
impl UsageStrategy for TelemetryUsageStrategy {
    fn name(&self) -> &'static str {
        "telemetry"
    }

    fn source(&self) -> UsageSource {
        UsageSource::Telemetry
    }

    async fn acquire(&self, request: &UsageRequest<'_>) -> Result<Vec<DiskUsageSample>, AcquisitionError> {
        let paths = self.telemetry.list_filesystem_paths(request.instance_id).await?;
        let path = select_filesystem_path(request.device, &paths).ok_or(AcquisitionError::NoTelemetry)?;

        let target = MetricTarget::Filesystem {
            instance_id: request.instance_id.to_string(),
            path: path.clone(),
        };
        let datapoints = self
            .telemetry
            .query_metric(&target, MetricName::DiskUsedPercent, request.window)
            .await?;

        if datapoints.is_empty() {
            return Err(AcquisitionError::NoTelemetry);
        }

        debug!(
            instance_id = %request.instance_id,
            path = %path,
            datapoints = datapoints.len(),
            "Filesystem usage telemetry found"
        );

        Ok(datapoints
            .into_iter()
            .map(|dp| DiskUsageSample {
                used_percent: dp.maximum.max(dp.average),
                source: UsageSource::Telemetry,
                path: Some(path.clone()),
                timestamp: Some(dp.timestamp),
            })
            .collect())
    }
}

fn ensure_reachable(instance_id: &str, reach: &Reachability) -> Result<(), AcquisitionError> {
    if reach.reachable {
        return Ok(());
    }
    Err(AcquisitionError::Unreachable {
        instance_id: instance_id.to_string(),
        reason: reach.reason.clone().unwrap_or_default(),
    })
}

fn remote_sample(used_percent: f64, path: String) -> Vec<DiskUsageSample> {
    vec![DiskUsageSample {
        used_percent,
        source: UsageSource::RemoteExec,
        path: Some(path),
        timestamp: Some(Utc::now()),
    }]
}

/// Remote usage command against the root filesystem of a boot device
pub struct RootRemoteStrategy {
    runner: RemoteCommandRunner,
    inventory: Arc<dyn InventoryService>,
    remote: Arc<dyn RemoteExecService>,
}

impl RootRemoteStrategy {
    pub fn new(
        runner: RemoteCommandRunner,
        inventory: Arc<dyn InventoryService>,
        remote: Arc<dyn RemoteExecService>,
    ) -> Self {
        Self {
            runner,
            inventory,
            remote,
        }
    }
}

#[async_trait]
impl UsageStrategy for RootRemoteStrategy {
    fn name(&self) -> &'static str {
        "remote-root"
    }

    fn source(&self) -> UsageSource {
        UsageSource::RemoteExec
    }

    async fn acquire(&self, request: &UsageRequest<'_>) -> Result<Vec<DiskUsageSample>, AcquisitionError> {
        if !is_boot_device(request.device) {
            return Err(AcquisitionError::NotApplicable(request.device.to_string()));
        }

        let reach = request
            .reachability
            .resolve(request.instance_id, self.inventory.as_ref(), self.remote.as_ref())
            .await?;
        ensure_reachable(request.instance_id, &reach)?;

        match reach.platform {
            Platform::Linux => {
                let out = self
                    .runner
                    .run(request.instance_id, Platform::Linux, &posix_usage_script("/"))
                    .await?;
                Ok(remote_sample(parse_df_output(&out)?, "/".to_string()))
            }
            Platform::Windows => {
                let out = self
                    .runner
                    .run(request.instance_id, Platform::Windows, &windows_usage_script('C'))
                    .await?;
                Ok(remote_sample(parse_windows_usage(&out, 'C')?, "C:".to_string()))
            }
        }
    }
}

/// Remote usage command against the mount point of a secondary device
pub struct MountRemoteStrategy {
    runner: RemoteCommandRunner,
    inventory: Arc<dyn InventoryService>,
    remote: Arc<dyn RemoteExecService>,
}

impl MountRemoteStrategy {
    pub fn new(
        runner: RemoteCommandRunner,
        inventory: Arc<dyn InventoryService>,
        remote: Arc<dyn RemoteExecService>,
    ) -> Self {
        Self {
            runner,
            inventory,
            remote,
        }
    }

    async fn resolve_mount_point(&self, request: &UsageRequest<'_>) -> Result<String, AcquisitionError> {
        let lookup = self
            .runner
            .run(request.instance_id, Platform::Linux, &mount_lookup_script(request.device))
            .await;

        match lookup.map(|out| parse_mount_point(&out)) {
            Ok(Some(mount)) => Ok(mount),
            other => {
                if let Err(e) = &other {
                    debug!(device = %request.device, error = %e, "Mount point lookup failed");
                }
                let guess = guess_mount_point(request.device)
                    .ok_or_else(|| AcquisitionError::NoMountPoint(request.device.to_string()))?;
                info!(
                    instance_id = %request.instance_id,
                    device = %request.device,
                    mount = guess,
                    "Using conventional mount point for device"
                );
                Ok(guess.to_string())
            }
        }
    }
}

#[async_trait]
impl UsageStrategy for MountRemoteStrategy {
    fn name(&self) -> &'static str {
        "remote-mount"
    }

    fn source(&self) -> UsageSource {
        UsageSource::RemoteExec
    }

    async fn acquire(&self, request: &UsageRequest<'_>) -> Result<Vec<DiskUsageSample>, AcquisitionError> {
        if is_boot_device(request.device) {
            return Err(AcquisitionError::NotApplicable(request.device.to_string()));
        }

        let reach = request
            .reachability
            .resolve(request.instance_id, self.inventory.as_ref(), self.remote.as_ref())
            .await?;
        ensure_reachable(request.instance_id, &reach)?;

        match reach.platform {
            Platform::Linux => {
                let mount = self.resolve_mount_point(request).await?;
                let out = self
                    .runner
                    .run(request.instance_id, Platform::Linux, &posix_usage_script(&mount))
                    .await?;
                Ok(remote_sample(parse_df_output(&out)?, mount))
            }
            Platform::Windows => {
                let drive = windows_drive_letter(request.device)
                    .ok_or_else(|| AcquisitionError::NoMountPoint(request.device.to_string()))?;
                let out = self
                    .runner
                    .run(request.instance_id, Platform::Windows, &windows_usage_script(drive))
                    .await?;
                Ok(remote_sample(parse_windows_usage(&out, drive)?, format!("{}:", drive)))
            }
        }
    }
}
