//! Capability interfaces to the cloud platform
//!
//! The engine only talks to the platform through these traits. Detection
//! uses the read-only inventory, telemetry and remote execution services;
//! the executor is the only caller of [`ActionService`].

mod snapshot;

pub use snapshot::{CloudSnapshot, CommandFixture, FilesystemSeries, MutationKind, RecordedMutation, SnapshotBackend};

use crate::error::BackendResult;
use crate::models::{InstanceInfo, Platform, Volume, VolumeClass, VolumeState};
use crate::telemetry::{Datapoint, MetricName, MetricTarget, MetricWindow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub use async_trait::async_trait;

/// Restricts a volume listing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeFilter {
    /// Only these ids (empty means all)
    #[serde(default)]
    pub volume_ids: Vec<String>,
    /// Only these lifecycle states (empty means all)
    #[serde(default)]
    pub states: Vec<VolumeState>,
}

impl VolumeFilter {
    pub fn ids(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            volume_ids: ids.into_iter().map(Into::into).collect(),
            states: Vec::new(),
        }
    }

    pub fn matches(&self, volume: &Volume) -> bool {
        (self.volume_ids.is_empty() || self.volume_ids.contains(&volume.volume_id))
            && (self.states.is_empty() || self.states.contains(&volume.state))
    }
}

/// Volume and instance metadata
#[async_trait]
pub trait InventoryService: Send + Sync {
    async fn list_volumes(&self, filter: &VolumeFilter) -> BackendResult<Vec<Volume>>;

    /// Current state of one volume; `NotFound` once it is gone
    async fn get_volume(&self, volume_id: &str) -> BackendResult<Volume>;

    async fn get_instance(&self, instance_id: &str) -> BackendResult<InstanceInfo>;
}

/// A filesystem the host agent reports usage for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemPath {
    pub path: String,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub fstype: Option<String>,
}

/// Metric queries
#[async_trait]
pub trait TelemetryService: Send + Sync {
    /// Datapoints for one signal; an empty vec is a valid answer
    async fn query_metric(
        &self,
        target: &MetricTarget,
        metric: MetricName,
        window: &MetricWindow,
    ) -> BackendResult<Vec<Datapoint>>;

    /// Filesystems with usage telemetry on an instance
    async fn list_filesystem_paths(&self, instance_id: &str) -> BackendResult<Vec<FilesystemPath>>;
}

/// Registration state of the remote execution agent on an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Online,
    ConnectionLost,
    Inactive,
    NotRegistered,
}

/// Remote command lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    InProgress,
    Success,
    Failed,
    TimedOut,
    Cancelled,
}

impl CommandStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CommandStatus::Success
                | CommandStatus::Failed
                | CommandStatus::TimedOut
                | CommandStatus::Cancelled
        )
    }
}

/// Status and output of a sent command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandInvocation {
    pub status: CommandStatus,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

/// Remote command execution on instances
#[async_trait]
pub trait RemoteExecService: Send + Sync {
    async fn agent_status(&self, instance_id: &str) -> BackendResult<AgentStatus>;

    /// Start a script and return its command id
    async fn send_command(
        &self,
        instance_id: &str,
        platform: Platform,
        script: &str,
    ) -> BackendResult<String>;

    async fn command_status(&self, command_id: &str, instance_id: &str) -> BackendResult<CommandInvocation>;
}

/// A volume modification request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModifyRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_type: Option<VolumeClass>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_gb: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iops: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throughput: Option<u32>,
}

/// Mutating requests; each returns once the platform accepted it
#[async_trait]
pub trait ActionService: Send + Sync {
    /// Returns the snapshot id
    async fn create_snapshot(
        &self,
        volume_id: &str,
        description: &str,
        tags: &BTreeMap<String, String>,
    ) -> BackendResult<String>;

    async fn detach_volume(&self, volume_id: &str) -> BackendResult<()>;

    async fn attach_volume(&self, volume_id: &str, instance_id: &str, device: &str) -> BackendResult<()>;

    async fn delete_volume(&self, volume_id: &str) -> BackendResult<()>;

    async fn modify_volume(&self, volume_id: &str, request: &ModifyRequest) -> BackendResult<()>;
}

/// The full set of collaborators the engine needs
#[derive(Clone)]
pub struct Backends {
    pub inventory: Arc<dyn InventoryService>,
    pub telemetry: Arc<dyn TelemetryService>,
    pub remote: Arc<dyn RemoteExecService>,
    pub actions: Arc<dyn ActionService>,
}

impl Backends {
    /// Use one implementation for every capability
    pub fn shared<T>(backend: Arc<T>) -> Self
    where
        T: InventoryService + TelemetryService + RemoteExecService + ActionService + 'static,
    {
        Self {
            inventory: backend.clone(),
            telemetry: backend.clone(),
            remote: backend.clone(),
            actions: backend,
        }
    }
}
