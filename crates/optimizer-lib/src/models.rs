//! Data models for volume analysis and remediation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Block-storage volume class
///
/// Unrecognized class names are preserved so pricing and reports can still
/// refer to them by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum VolumeClass {
    /// Burstable general-purpose SSD
    Gp2,
    /// Balanced SSD with independently provisioned IOPS and throughput
    Gp3,
    /// Provisioned-IOPS SSD
    Io1,
    /// Provisioned-IOPS SSD, higher durability tier
    Io2,
    /// Throughput-optimized HDD
    St1,
    /// Cold HDD
    Sc1,
    /// Legacy magnetic
    Standard,
    Unknown(String),
}

/// Minimum IOPS the balanced SSD class can be provisioned with
pub const GP3_MIN_IOPS: u32 = 3000;
/// Minimum throughput (MiB/s) the balanced SSD class can be provisioned with
pub const GP3_MIN_THROUGHPUT: u32 = 125;
/// Maximum IOPS the balanced SSD class supports
pub const GP3_MAX_IOPS: u32 = 16000;
/// Maximum throughput (MiB/s) the balanced SSD class supports
pub const GP3_MAX_THROUGHPUT: u32 = 1000;
/// Minimum IOPS for the provisioned-IOPS classes
pub const PIOPS_MIN_IOPS: u32 = 100;

impl VolumeClass {
    pub fn as_str(&self) -> &str {
        match self {
            VolumeClass::Gp2 => "gp2",
            VolumeClass::Gp3 => "gp3",
            VolumeClass::Io1 => "io1",
            VolumeClass::Io2 => "io2",
            VolumeClass::St1 => "st1",
            VolumeClass::Sc1 => "sc1",
            VolumeClass::Standard => "standard",
            VolumeClass::Unknown(name) => name,
        }
    }

    /// Classes whose provisioned IOPS are billed and can be tuned
    pub fn is_iops_billed(&self) -> bool {
        matches!(self, VolumeClass::Gp3 | VolumeClass::Io1 | VolumeClass::Io2)
    }

    /// Classes whose provisioned throughput is billed and can be tuned
    pub fn is_throughput_billed(&self) -> bool {
        matches!(self, VolumeClass::Gp3)
    }

    /// Classes that report a burst-credit balance
    pub fn has_burst_balance(&self) -> bool {
        matches!(self, VolumeClass::Gp2 | VolumeClass::St1 | VolumeClass::Sc1)
    }

    /// Lowest IOPS value the class accepts, if IOPS are provisioned at all
    pub fn min_iops(&self) -> Option<u32> {
        match self {
            VolumeClass::Gp3 => Some(GP3_MIN_IOPS),
            VolumeClass::Io1 | VolumeClass::Io2 => Some(PIOPS_MIN_IOPS),
            _ => None,
        }
    }

    /// Lowest throughput value the class accepts, if throughput is provisioned at all
    pub fn min_throughput(&self) -> Option<u32> {
        match self {
            VolumeClass::Gp3 => Some(GP3_MIN_THROUGHPUT),
            _ => None,
        }
    }

    /// Class a remediation moves to when no explicit target is given
    pub fn default_migration_target(&self) -> VolumeClass {
        match self {
            VolumeClass::Io1
            | VolumeClass::Io2
            | VolumeClass::Gp2
            | VolumeClass::St1
            | VolumeClass::Sc1
            | VolumeClass::Standard => VolumeClass::Gp3,
            other => other.clone(),
        }
    }
}

impl From<String> for VolumeClass {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "gp2" => VolumeClass::Gp2,
            "gp3" => VolumeClass::Gp3,
            "io1" => VolumeClass::Io1,
            "io2" => VolumeClass::Io2,
            "st1" => VolumeClass::St1,
            "sc1" => VolumeClass::Sc1,
            "standard" => VolumeClass::Standard,
            _ => VolumeClass::Unknown(value),
        }
    }
}

impl From<&str> for VolumeClass {
    fn from(value: &str) -> Self {
        VolumeClass::from(value.to_string())
    }
}

impl From<VolumeClass> for String {
    fn from(value: VolumeClass) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for VolumeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Volume lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VolumeState {
    Creating,
    Available,
    InUse,
    Deleting,
    Deleted,
    Error,
    #[serde(other)]
    Unknown,
}

/// A volume's attachment to an instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub instance_id: String,
    /// Device path as reported by the platform (e.g. /dev/xvdf)
    pub device: String,
    #[serde(default)]
    pub attach_time: Option<DateTime<Utc>>,
    #[serde(default = "default_attachment_state")]
    pub state: String,
    #[serde(default)]
    pub delete_on_termination: bool,
}

fn default_attachment_state() -> String {
    "attached".to_string()
}

/// Block-storage volume metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub volume_id: String,
    pub volume_type: VolumeClass,
    pub size_gb: u64,
    /// Provisioned IOPS
    #[serde(default)]
    pub iops: Option<u32>,
    /// Provisioned throughput in MiB/s
    #[serde(default)]
    pub throughput: Option<u32>,
    pub state: VolumeState,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub availability_zone: Option<String>,
    #[serde(default)]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub encrypted: bool,
}

impl Volume {
    /// Value of the `Name` tag, if any
    pub fn name(&self) -> Option<&str> {
        self.tags.get("Name").map(String::as_str)
    }

    pub fn primary_attachment(&self) -> Option<&Attachment> {
        self.attachments.first()
    }

    /// Most recent attach time across all attachments
    pub fn latest_attach_time(&self) -> Option<DateTime<Utc>> {
        self.attachments.iter().filter_map(|a| a.attach_time).max()
    }
}

/// Operating system family of an instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Linux,
    Windows,
}

/// Instance run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    Pending,
    Running,
    Stopping,
    Stopped,
    ShuttingDown,
    Terminated,
    #[serde(other)]
    Unknown,
}

/// Instance metadata needed for usage acquisition and boot-device checks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub instance_id: String,
    pub state: InstanceState,
    #[serde(default)]
    pub platform: Platform,
    #[serde(default)]
    pub root_device_name: Option<String>,
}

/// Where a disk usage observation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UsageSource {
    Telemetry,
    RemoteExec,
}

/// One filled-percentage observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskUsageSample {
    pub used_percent: f64,
    pub source: UsageSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Outcome of disk usage acquisition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DiskUsage {
    Available {
        samples: Vec<DiskUsageSample>,
        /// Maximum of the samples
        used_percent: f64,
        source: UsageSource,
    },
    Unavailable {
        reason: String,
    },
}

impl DiskUsage {
    /// Reduce samples to the conservative representative value (maximum)
    ///
    /// Returns `Unavailable` when no sample carries a finite percentage.
    pub fn from_samples(samples: Vec<DiskUsageSample>, source: UsageSource) -> Self {
        let samples: Vec<DiskUsageSample> = samples
            .into_iter()
            .filter(|s| s.used_percent.is_finite())
            .collect();

        match samples.iter().map(|s| s.used_percent).reduce(f64::max) {
            Some(max) => DiskUsage::Available {
                samples,
                used_percent: max,
                source,
            },
            None => DiskUsage::Unavailable {
                reason: "no usable samples".to_string(),
            },
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        DiskUsage::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn used_percent(&self) -> Option<f64> {
        match self {
            DiskUsage::Available { used_percent, .. } => Some(*used_percent),
            DiskUsage::Unavailable { .. } => None,
        }
    }
}

/// Classification produced by a detection pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Classification {
    Idle,
    OverprovisionedSize,
    OverprovisionedPerformance,
    None,
}

/// Remediation kinds accepted by the executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    SnapshotOnly,
    SnapshotAndDelete,
    ChangeType,
    Resize,
    ChangeTypeAndResize,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::SnapshotOnly => "snapshot_only",
            ActionType::SnapshotAndDelete => "snapshot_and_delete",
            ActionType::ChangeType => "change_type",
            ActionType::Resize => "resize",
            ActionType::ChangeTypeAndResize => "change_type_and_resize",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A remediation request, carrying only the parameters its kind needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemediationAction {
    SnapshotOnly,
    SnapshotAndDelete,
    ChangeType {
        #[serde(default)]
        target_class: Option<VolumeClass>,
        #[serde(default)]
        iops: Option<u32>,
        #[serde(default)]
        throughput: Option<u32>,
    },
    Resize {
        target_size_gb: u64,
    },
    ChangeTypeAndResize {
        #[serde(default)]
        target_class: Option<VolumeClass>,
        target_size_gb: u64,
        #[serde(default)]
        iops: Option<u32>,
        #[serde(default)]
        throughput: Option<u32>,
    },
}

impl RemediationAction {
    pub fn action_type(&self) -> ActionType {
        match self {
            RemediationAction::SnapshotOnly => ActionType::SnapshotOnly,
            RemediationAction::SnapshotAndDelete => ActionType::SnapshotAndDelete,
            RemediationAction::ChangeType { .. } => ActionType::ChangeType,
            RemediationAction::Resize { .. } => ActionType::Resize,
            RemediationAction::ChangeTypeAndResize { .. } => ActionType::ChangeTypeAndResize,
        }
    }

    /// Size the action would set, if it touches size at all
    pub fn target_size_gb(&self) -> Option<u64> {
        match self {
            RemediationAction::Resize { target_size_gb }
            | RemediationAction::ChangeTypeAndResize { target_size_gb, .. } => {
                Some(*target_size_gb)
            }
            _ => None,
        }
    }
}

/// Terminal status of an execution attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    SkippedRootVolume,
    SkippedRootVolumeResize,
    NoChangeNeeded,
    SnapshotInitiated,
    DeleteInitiated,
    ModificationInitiated,
    Failed,
    Error,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::SkippedRootVolume => "skipped_root_volume",
            ExecutionStatus::SkippedRootVolumeResize => "skipped_root_volume_resize",
            ExecutionStatus::NoChangeNeeded => "no_change_needed",
            ExecutionStatus::SnapshotInitiated => "snapshot_initiated",
            ExecutionStatus::DeleteInitiated => "delete_initiated",
            ExecutionStatus::ModificationInitiated => "modification_initiated",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Error => "error",
        }
    }

    /// Whether the requested end state holds or was requested
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::NoChangeNeeded
                | ExecutionStatus::SnapshotInitiated
                | ExecutionStatus::DeleteInitiated
                | ExecutionStatus::ModificationInitiated
        )
    }
}

/// Outcome of one remediation attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub volume_id: String,
    pub action_type: ActionType,
    pub success: bool,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub details: BTreeMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

/// Derived result of analyzing one volume
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub volume_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub volume_type: VolumeClass,
    pub size_gb: u64,
    pub state: VolumeState,
    pub classification: Classification,
    pub is_idle: bool,
    pub is_overprovisioned: bool,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_monthly_cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_size_gb: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_class: Option<VolumeClass>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_iops: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_throughput: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_monthly_cost: Option<f64>,
    pub estimated_monthly_savings: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<RemediationAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_usage: Option<DiskUsage>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Counts for one analysis pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub total_volumes: usize,
    pub idle_count: usize,
    pub overprovisioned_count: usize,
    pub error_count: usize,
    pub estimated_monthly_savings: f64,
}

/// Output of `analyze`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub region: String,
    pub generated_at: DateTime<Utc>,
    pub summary: AnalysisSummary,
    pub results: Vec<Recommendation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_class_round_trips_unknown_names() {
        let class: VolumeClass = serde_json::from_str("\"io3-preview\"").unwrap();
        assert_eq!(class, VolumeClass::Unknown("io3-preview".to_string()));
        assert_eq!(serde_json::to_string(&class).unwrap(), "\"io3-preview\"");
    }

    #[test]
    fn test_volume_state_parses_in_use() {
        let state: VolumeState = serde_json::from_str("\"in-use\"").unwrap();
        assert_eq!(state, VolumeState::InUse);

        let state: VolumeState = serde_json::from_str("\"optimizing\"").unwrap();
        assert_eq!(state, VolumeState::Unknown);
    }

    #[test]
    fn test_default_migration_target() {
        assert_eq!(VolumeClass::Io1.default_migration_target(), VolumeClass::Gp3);
        assert_eq!(VolumeClass::Standard.default_migration_target(), VolumeClass::Gp3);
        assert_eq!(VolumeClass::Gp3.default_migration_target(), VolumeClass::Gp3);
    }

    #[test]
    fn test_disk_usage_uses_maximum_sample() {
        let samples = vec![
            DiskUsageSample {
                used_percent: 12.5,
                source: UsageSource::Telemetry,
                path: Some("/data".to_string()),
                timestamp: None,
            },
            DiskUsageSample {
                used_percent: 18.0,
                source: UsageSource::Telemetry,
                path: Some("/data".to_string()),
                timestamp: None,
            },
            DiskUsageSample {
                used_percent: f64::NAN,
                source: UsageSource::Telemetry,
                path: None,
                timestamp: None,
            },
        ];

        let usage = DiskUsage::from_samples(samples, UsageSource::Telemetry);
        assert_eq!(usage.used_percent(), Some(18.0));
        match usage {
            DiskUsage::Available { samples, .. } => assert_eq!(samples.len(), 2),
            DiskUsage::Unavailable { .. } => panic!("expected available usage"),
        }
    }

    #[test]
    fn test_disk_usage_without_samples_is_unavailable() {
        let usage = DiskUsage::from_samples(Vec::new(), UsageSource::RemoteExec);
        assert!(usage.used_percent().is_none());
    }

    #[test]
    fn test_remediation_action_wire_format() {
        let action: RemediationAction =
            serde_json::from_str(r#"{"type":"resize","target_size_gb":40}"#).unwrap();
        assert_eq!(action.action_type(), ActionType::Resize);
        assert_eq!(action.target_size_gb(), Some(40));

        let action: RemediationAction = serde_json::from_str(r#"{"type":"change_type"}"#).unwrap();
        assert_eq!(
            action,
            RemediationAction::ChangeType {
                target_class: None,
                iops: None,
                throughput: None
            }
        );
    }
}
