//! Remediation executor
//!
//! Applies one remediation to one volume. The live volume is re-read first,
//! boot devices are protected from deletion and shrinking, and the action is
//! then dispatched. A result is always produced; platform rejections end as
//! `failed` and anything else unexpected as `error`.

use crate::backend::{ActionService, InventoryService, ModifyRequest};
use crate::error::BackendError;
use crate::models::{
    ActionType, ExecutionResult, ExecutionStatus, RemediationAction, Volume, VolumeClass,
    GP3_MAX_IOPS, GP3_MAX_THROUGHPUT,
};
use crate::observability::{AuditLogger, OptimizerMetrics};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Value of the `Source` tag on snapshots this executor creates
pub const SNAPSHOT_SOURCE: &str = "volume-optimizer";

type Details = BTreeMap<String, Value>;

enum StepError {
    /// Rejected by the platform or refused by a safety check
    Failed(String),
    Unexpected(String),
}

impl From<BackendError> for StepError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::NotFound(_)
            | BackendError::IncorrectState(_)
            | BackendError::InvalidParameter(_) => StepError::Failed(e.to_string()),
            BackendError::Unavailable(_) | BackendError::Other(_) => {
                StepError::Unexpected(e.to_string())
            }
        }
    }
}

/// Tags attached to a snapshot taken before `action`
pub fn snapshot_tags(volume: &Volume, action: ActionType) -> BTreeMap<String, String> {
    let action_name = action.as_str();
    let short: String = action_name.chars().take(10).collect();

    let mut tags = BTreeMap::new();
    tags.insert(
        "Name".to_string(),
        format!("AutoSnapshot-{}-{}", volume.volume_id, short),
    );
    tags.insert("AutoCreated".to_string(), "true".to_string());
    tags.insert("Source".to_string(), SNAPSHOT_SOURCE.to_string());
    tags.insert("TriggeringAction".to_string(), action_name.to_string());
    tags.insert("CreationTimestamp".to_string(), Utc::now().to_rfc3339());
    if let Some(name) = volume.name() {
        tags.insert("VolumeName".to_string(), name.to_string());
    }
    tags
}

/// Provisioning figures valid for `target`, carrying `requested` or `current`
/// forward and clamping into the class limits
fn carry_forward(
    target: &VolumeClass,
    requested_iops: Option<u32>,
    requested_throughput: Option<u32>,
    volume: &Volume,
) -> (Option<u32>, Option<u32>) {
    let iops = target.min_iops().map(|min| {
        let value = requested_iops.or(volume.iops).unwrap_or(min).max(min);
        if *target == VolumeClass::Gp3 {
            value.min(GP3_MAX_IOPS)
        } else {
            value
        }
    });
    let throughput = target.min_throughput().map(|min| {
        requested_throughput
            .or(volume.throughput)
            .unwrap_or(min)
            .clamp(min, GP3_MAX_THROUGHPUT)
    });
    (iops, throughput)
}

/// Applies remediations through the action service
pub struct RemediationExecutor {
    inventory: Arc<dyn InventoryService>,
    actions: Arc<dyn ActionService>,
    metrics: OptimizerMetrics,
    audit: AuditLogger,
}

impl RemediationExecutor {
    pub fn new(
        inventory: Arc<dyn InventoryService>,
        actions: Arc<dyn ActionService>,
        audit: AuditLogger,
    ) -> Self {
        Self {
            inventory,
            actions,
            metrics: OptimizerMetrics::new(),
            audit,
        }
    }

    /// Apply `action` to `volume_id`
    pub async fn execute(&self, volume_id: &str, action: &RemediationAction) -> ExecutionResult {
        let action_type = action.action_type();
        let mut details = Details::new();

        let status = match self.run(volume_id, action, &mut details).await {
            Ok(status) => status,
            Err(StepError::Failed(message)) => {
                details.insert("error".to_string(), json!(message));
                ExecutionStatus::Failed
            }
            Err(StepError::Unexpected(message)) => {
                error!(
                    volume_id = %volume_id,
                    action = %action_type,
                    error = %message,
                    "Unexpected failure during remediation"
                );
                details.insert(
                    "error".to_string(),
                    json!("unexpected error during remediation, see service logs"),
                );
                ExecutionStatus::Error
            }
        };

        let result = ExecutionResult {
            volume_id: volume_id.to_string(),
            action_type,
            success: status.is_success(),
            status,
            details,
            timestamp: Utc::now(),
        };
        self.metrics.inc_execution(action_type.as_str(), status);
        self.audit.log_execution(&result);
        result
    }

    async fn run(
        &self,
        volume_id: &str,
        action: &RemediationAction,
        details: &mut Details,
    ) -> Result<ExecutionStatus, StepError> {
        let volume = match self.inventory.get_volume(volume_id).await {
            Ok(volume) => volume,
            Err(BackendError::NotFound(_)) if *action == RemediationAction::SnapshotAndDelete => {
                info!(volume_id = %volume_id, "Volume already deleted");
                details.insert("message".to_string(), json!("volume already deleted"));
                return Ok(ExecutionStatus::DeleteInitiated);
            }
            Err(BackendError::NotFound(_)) => {
                return Err(StepError::Failed(format!("volume {} not found", volume_id)));
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(status) = self.protect_boot_device(&volume, action, details).await? {
            return Ok(status);
        }

        info!(
            volume_id = %volume_id,
            action = %action.action_type(),
            "Starting remediation"
        );

        match action {
            RemediationAction::SnapshotOnly => self.snapshot_only(&volume, details).await,
            RemediationAction::SnapshotAndDelete => self.snapshot_and_delete(&volume, details).await,
            RemediationAction::ChangeType {
                target_class,
                iops,
                throughput,
            } => {
                self.change_type(&volume, target_class.clone(), *iops, *throughput, details)
                    .await
            }
            RemediationAction::Resize { target_size_gb } => {
                self.resize(&volume, *target_size_gb, details).await
            }
            RemediationAction::ChangeTypeAndResize {
                target_class,
                target_size_gb,
                iops,
                throughput,
            } => {
                self.change_type_and_resize(
                    &volume,
                    target_class.clone(),
                    *target_size_gb,
                    *iops,
                    *throughput,
                    details,
                )
                .await
            }
        }
    }

    /// Whether any attachment of `volume` is its instance's root device
    async fn is_boot_volume(&self, volume: &Volume) -> Result<bool, BackendError> {
        for attachment in &volume.attachments {
            let instance = self.inventory.get_instance(&attachment.instance_id).await?;
            if instance.root_device_name.as_deref() == Some(attachment.device.as_str()) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// `Some(status)` when the action must not proceed on this volume
    async fn protect_boot_device(
        &self,
        volume: &Volume,
        action: &RemediationAction,
        details: &mut Details,
    ) -> Result<Option<ExecutionStatus>, StepError> {
        let deletes = *action == RemediationAction::SnapshotAndDelete;
        let shrinks = action
            .target_size_gb()
            .is_some_and(|target| target < volume.size_gb);
        let changes_class = matches!(action, RemediationAction::ChangeType { .. });

        if volume.attachments.is_empty() || !(deletes || shrinks || changes_class) {
            return Ok(None);
        }

        let is_boot = match self.is_boot_volume(volume).await {
            Ok(is_boot) => is_boot,
            Err(e) if deletes || shrinks => {
                return Err(StepError::Failed(format!(
                    "could not verify boot device status: {}",
                    e
                )));
            }
            Err(e) => {
                warn!(volume_id = %volume.volume_id, error = %e, "Boot device lookup failed");
                false
            }
        };
        if !is_boot {
            return Ok(None);
        }

        if deletes {
            let message = format!("volume {} is a boot volume and cannot be deleted", volume.volume_id);
            warn!(volume_id = %volume.volume_id, "Skipping delete of boot volume");
            details.insert("error".to_string(), json!(message));
            return Ok(Some(ExecutionStatus::SkippedRootVolume));
        }
        if shrinks {
            let message = format!(
                "volume {} is a boot volume and cannot be shrunk from {} GB",
                volume.volume_id, volume.size_gb
            );
            warn!(volume_id = %volume.volume_id, "Skipping shrink of boot volume");
            details.insert("error".to_string(), json!(message));
            return Ok(Some(ExecutionStatus::SkippedRootVolumeResize));
        }

        warn!(volume_id = %volume.volume_id, "Changing class of a boot volume");
        details.insert("caution".to_string(), json!("boot volume"));
        Ok(None)
    }

    async fn take_snapshot(
        &self,
        volume: &Volume,
        action: ActionType,
        details: &mut Details,
    ) -> Result<(), StepError> {
        let description = format!(
            "Snapshot before {} - {}",
            action.as_str(),
            Utc::now().format("%Y-%m-%d")
        );
        let snapshot_id = self
            .actions
            .create_snapshot(&volume.volume_id, &description, &snapshot_tags(volume, action))
            .await
            .map_err(|e| StepError::Failed(format!("snapshot request failed: {}", e)))?;

        info!(volume_id = %volume.volume_id, snapshot_id = %snapshot_id, "Snapshot requested");
        details.insert("snapshot_id".to_string(), json!(snapshot_id));
        Ok(())
    }

    async fn snapshot_only(&self, volume: &Volume, details: &mut Details) -> Result<ExecutionStatus, StepError> {
        self.take_snapshot(volume, ActionType::SnapshotOnly, details).await?;
        Ok(ExecutionStatus::SnapshotInitiated)
    }

    async fn snapshot_and_delete(
        &self,
        volume: &Volume,
        details: &mut Details,
    ) -> Result<ExecutionStatus, StepError> {
        self.take_snapshot(volume, ActionType::SnapshotAndDelete, details)
            .await?;

        if !volume.attachments.is_empty() {
            match self.actions.detach_volume(&volume.volume_id).await {
                Ok(()) => {
                    details.insert("detached".to_string(), json!(true));
                }
                Err(e) if e.is_idempotent_conflict() => {
                    info!(volume_id = %volume.volume_id, error = %e, "Volume already detached");
                }
                Err(e) => return Err(e.into()),
            }
        }

        match self.actions.delete_volume(&volume.volume_id).await {
            Ok(()) => {}
            Err(BackendError::NotFound(_)) => {
                info!(volume_id = %volume.volume_id, "Volume already deleted");
            }
            Err(e) => return Err(e.into()),
        }

        details.insert("message".to_string(), json!("snapshot and delete requested"));
        Ok(ExecutionStatus::DeleteInitiated)
    }

    async fn change_type(
        &self,
        volume: &Volume,
        target_class: Option<VolumeClass>,
        iops: Option<u32>,
        throughput: Option<u32>,
        details: &mut Details,
    ) -> Result<ExecutionStatus, StepError> {
        let target = target_class.unwrap_or_else(|| volume.volume_type.default_migration_target());
        let retunes = iops.is_some() || throughput.is_some();
        let (iops, throughput) = carry_forward(&target, iops, throughput, volume);

        // Same class is a no-op unless new provisioning figures were asked for.
        if target == volume.volume_type
            && (!retunes || (iops == volume.iops && throughput == volume.throughput))
        {
            details.insert(
                "message".to_string(),
                json!(format!("volume is already {}", target)),
            );
            return Ok(ExecutionStatus::NoChangeNeeded);
        }

        let request = ModifyRequest {
            volume_type: Some(target.clone()),
            size_gb: None,
            iops,
            throughput,
        };
        self.actions.modify_volume(&volume.volume_id, &request).await?;

        details.insert("previous_type".to_string(), json!(volume.volume_type));
        details.insert("new_type".to_string(), json!(target));
        details.insert("iops".to_string(), json!(iops));
        details.insert("throughput".to_string(), json!(throughput));
        Ok(ExecutionStatus::ModificationInitiated)
    }

    async fn resize(
        &self,
        volume: &Volume,
        target_size_gb: u64,
        details: &mut Details,
    ) -> Result<ExecutionStatus, StepError> {
        if target_size_gb < volume.size_gb {
            return Err(StepError::Failed(format!(
                "shrinking from {} GB to {} GB is not supported in place",
                volume.size_gb, target_size_gb
            )));
        }

        details.insert(
            "message".to_string(),
            json!(format!(
                "target {} GB does not reduce current {} GB",
                target_size_gb, volume.size_gb
            )),
        );
        Ok(ExecutionStatus::NoChangeNeeded)
    }

    async fn change_type_and_resize(
        &self,
        volume: &Volume,
        target_class: Option<VolumeClass>,
        target_size_gb: u64,
        iops: Option<u32>,
        throughput: Option<u32>,
        details: &mut Details,
    ) -> Result<ExecutionStatus, StepError> {
        let target = target_class.unwrap_or_else(|| volume.volume_type.default_migration_target());
        let class_changes = target != volume.volume_type;
        let size_changes = target_size_gb != volume.size_gb;

        if !class_changes && !size_changes {
            details.insert(
                "message".to_string(),
                json!(format!("volume is already {} at {} GB", target, volume.size_gb)),
            );
            return Ok(ExecutionStatus::NoChangeNeeded);
        }
        if target_size_gb < volume.size_gb {
            return Err(StepError::Failed(format!(
                "shrinking from {} GB to {} GB is not supported in place",
                volume.size_gb, target_size_gb
            )));
        }

        let (iops, throughput) = carry_forward(&target, iops, throughput, volume);
        let request = ModifyRequest {
            volume_type: class_changes.then(|| target.clone()),
            size_gb: size_changes.then_some(target_size_gb),
            iops,
            throughput,
        };
        self.actions.modify_volume(&volume.volume_id, &request).await?;

        details.insert("previous_type".to_string(), json!(volume.volume_type));
        details.insert("new_type".to_string(), json!(target));
        details.insert("previous_size_gb".to_string(), json!(volume.size_gb));
        details.insert("new_size_gb".to_string(), json!(target_size_gb));
        Ok(ExecutionStatus::ModificationInitiated)
    }
}

#[cfg(test)]
mod tests;
