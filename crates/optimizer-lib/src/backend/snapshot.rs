//! In-memory backend replaying a recorded inventory snapshot
//!
//! Serves volumes, instances, metric series, filesystem usage and remote
//! command fixtures from a JSON document. Mutations are applied to the
//! in-memory state and recorded so callers can inspect what would have
//! been sent to the platform.

use super::{
    async_trait, ActionService, AgentStatus, CommandInvocation, CommandStatus, FilesystemPath,
    InventoryService, ModifyRequest, RemoteExecService, TelemetryService, VolumeFilter,
};
use crate::error::{BackendError, BackendResult};
use crate::models::{InstanceInfo, Platform, Volume, VolumeState};
use crate::telemetry::{Datapoint, MetricName, MetricTarget, MetricWindow};
use anyhow::Context;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Most recent mutations and scripts kept for inspection
pub const MAX_RECORDED: usize = 1000;

/// Usage series for one filesystem on an instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilesystemSeries {
    pub path: String,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub fstype: Option<String>,
    #[serde(default)]
    pub datapoints: Vec<Datapoint>,
}

/// Canned reply for scripts sent to an instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandFixture {
    /// Restrict to one instance (any instance when unset)
    #[serde(default)]
    pub instance_id: Option<String>,
    /// Matches scripts containing this text
    pub script_contains: String,
    #[serde(default = "default_fixture_status")]
    pub status: CommandStatus,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    /// Status checks answered with `in_progress` before the final status
    #[serde(default)]
    pub pending_polls: u32,
}

fn default_fixture_status() -> CommandStatus {
    CommandStatus::Success
}

/// Serialized form of a recorded environment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudSnapshot {
    pub volumes: Vec<Volume>,
    pub instances: Vec<InstanceInfo>,
    /// volume id -> signal -> datapoints
    pub volume_metrics: BTreeMap<String, BTreeMap<MetricName, Vec<Datapoint>>>,
    /// instance id -> filesystems
    pub filesystems: BTreeMap<String, Vec<FilesystemSeries>>,
    /// instance id -> remote execution agent status
    pub agents: BTreeMap<String, AgentStatus>,
    pub commands: Vec<CommandFixture>,
}

/// Kind of mutating request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    CreateSnapshot,
    Detach,
    Attach,
    Delete,
    Modify,
}

/// A mutating request the backend accepted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedMutation {
    pub kind: MutationKind,
    pub volume_id: String,
    pub detail: serde_json::Value,
}

struct InFlightCommand {
    instance_id: String,
    remaining_polls: u32,
    reply: CommandInvocation,
}

/// Replay backend implementing every capability trait
pub struct SnapshotBackend {
    volumes: RwLock<BTreeMap<String, Volume>>,
    instances: BTreeMap<String, InstanceInfo>,
    volume_metrics: BTreeMap<String, BTreeMap<MetricName, Vec<Datapoint>>>,
    filesystems: BTreeMap<String, Vec<FilesystemSeries>>,
    agents: BTreeMap<String, AgentStatus>,
    fixtures: Vec<CommandFixture>,
    in_flight: DashMap<String, InFlightCommand>,
    sent_scripts: RwLock<VecDeque<(String, String)>>,
    mutations: RwLock<VecDeque<RecordedMutation>>,
    mutation_failures: DashMap<MutationKind, BackendError>,
    metric_failures: DashMap<(String, MetricName), BackendError>,
    instance_failures: DashMap<String, BackendError>,
    detach_race: AtomicBool,
    next_id: AtomicU64,
}

fn push_bounded<T>(log: &mut VecDeque<T>, entry: T) {
    if log.len() >= MAX_RECORDED {
        log.pop_front();
    }
    log.push_back(entry);
}

impl SnapshotBackend {
    pub fn from_snapshot(snapshot: CloudSnapshot) -> Self {
        Self {
            volumes: RwLock::new(
                snapshot
                    .volumes
                    .into_iter()
                    .map(|v| (v.volume_id.clone(), v))
                    .collect(),
            ),
            instances: snapshot
                .instances
                .into_iter()
                .map(|i| (i.instance_id.clone(), i))
                .collect(),
            volume_metrics: snapshot.volume_metrics,
            filesystems: snapshot.filesystems,
            agents: snapshot.agents,
            fixtures: snapshot.commands,
            in_flight: DashMap::new(),
            sent_scripts: RwLock::new(VecDeque::new()),
            mutations: RwLock::new(VecDeque::new()),
            mutation_failures: DashMap::new(),
            metric_failures: DashMap::new(),
            instance_failures: DashMap::new(),
            detach_race: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        }
    }

    /// Load a snapshot document from disk
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
        let snapshot: CloudSnapshot =
            serde_json::from_str(&content).context("Failed to parse snapshot")?;

        info!(
            path = %path.display(),
            volumes = snapshot.volumes.len(),
            instances = snapshot.instances.len(),
            "Loaded inventory snapshot"
        );

        Ok(Self::from_snapshot(snapshot))
    }

    /// Reject every request of `kind` with `error`
    pub fn with_mutation_failure(self, kind: MutationKind, error: BackendError) -> Self {
        self.mutation_failures.insert(kind, error);
        self
    }

    /// Reject queries of one volume signal with `error`
    pub fn with_metric_failure(
        self,
        volume_id: impl Into<String>,
        metric: MetricName,
        error: BackendError,
    ) -> Self {
        self.metric_failures.insert((volume_id.into(), metric), error);
        self
    }

    /// Reject lookups of one instance with `error`
    pub fn with_instance_failure(self, instance_id: impl Into<String>, error: BackendError) -> Self {
        self.instance_failures.insert(instance_id.into(), error);
        self
    }

    /// Detach calls find the volume detaching elsewhere: the attachment is
    /// cleared but the call reports `IncorrectState`
    pub fn with_detach_race(self) -> Self {
        self.detach_race.store(true, Ordering::Relaxed);
        self
    }

    /// Accepted mutations in request order, the oldest dropped past [`MAX_RECORDED`]
    pub async fn mutations(&self) -> Vec<RecordedMutation> {
        self.mutations.read().await.iter().cloned().collect()
    }

    /// Scripts sent so far as (instance id, script)
    pub async fn sent_scripts(&self) -> Vec<(String, String)> {
        self.sent_scripts.read().await.iter().cloned().collect()
    }

    /// Commands sent but not yet reported finished
    pub fn in_flight_commands(&self) -> usize {
        self.in_flight.len()
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}-{:08x}", prefix, self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn check_failure(&self, kind: MutationKind) -> BackendResult<()> {
        match self.mutation_failures.get(&kind) {
            Some(error) => Err(error.value().clone()),
            None => Ok(()),
        }
    }

    async fn record(&self, kind: MutationKind, volume_id: &str, detail: serde_json::Value) {
        debug!(kind = ?kind, volume_id = %volume_id, "Recorded mutation");
        let mutation = RecordedMutation {
            kind,
            volume_id: volume_id.to_string(),
            detail,
        };
        push_bounded(&mut *self.mutations.write().await, mutation);
    }

    fn find_fixture(&self, instance_id: &str, script: &str) -> Option<&CommandFixture> {
        self.fixtures.iter().find(|f| {
            f.instance_id.as_deref().map_or(true, |id| id == instance_id)
                && script.contains(&f.script_contains)
        })
    }
}

#[async_trait]
impl InventoryService for SnapshotBackend {
    async fn list_volumes(&self, filter: &VolumeFilter) -> BackendResult<Vec<Volume>> {
        let volumes = self.volumes.read().await;
        Ok(volumes.values().filter(|v| filter.matches(v)).cloned().collect())
    }

    async fn get_volume(&self, volume_id: &str) -> BackendResult<Volume> {
        self.volumes
            .read()
            .await
            .get(volume_id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("volume {}", volume_id)))
    }

    async fn get_instance(&self, instance_id: &str) -> BackendResult<InstanceInfo> {
        if let Some(error) = self.instance_failures.get(instance_id) {
            return Err(error.value().clone());
        }
        self.instances
            .get(instance_id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("instance {}", instance_id)))
    }
}

#[async_trait]
impl TelemetryService for SnapshotBackend {
    // Recorded series are replayed whole; the window is not applied.
    async fn query_metric(
        &self,
        target: &MetricTarget,
        metric: MetricName,
        _window: &MetricWindow,
    ) -> BackendResult<Vec<Datapoint>> {
        match target {
            MetricTarget::Volume { volume_id } => {
                if let Some(error) = self.metric_failures.get(&(volume_id.clone(), metric)) {
                    return Err(error.value().clone());
                }
                Ok(self
                    .volume_metrics
                    .get(volume_id)
                    .and_then(|series| series.get(&metric))
                    .cloned()
                    .unwrap_or_default())
            }
            MetricTarget::Filesystem { instance_id, path } => Ok(self
                .filesystems
                .get(instance_id)
                .and_then(|fs| fs.iter().find(|f| &f.path == path))
                .map(|f| f.datapoints.clone())
                .unwrap_or_default()),
        }
    }

    async fn list_filesystem_paths(&self, instance_id: &str) -> BackendResult<Vec<FilesystemPath>> {
        Ok(self
            .filesystems
            .get(instance_id)
            .map(|fs| {
                fs.iter()
                    .map(|f| FilesystemPath {
                        path: f.path.clone(),
                        device: f.device.clone(),
                        fstype: f.fstype.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl RemoteExecService for SnapshotBackend {
    async fn agent_status(&self, instance_id: &str) -> BackendResult<AgentStatus> {
        Ok(self
            .agents
            .get(instance_id)
            .copied()
            .unwrap_or(AgentStatus::NotRegistered))
    }

    async fn send_command(
        &self,
        instance_id: &str,
        _platform: Platform,
        script: &str,
    ) -> BackendResult<String> {
        if self.agents.get(instance_id) != Some(&AgentStatus::Online) {
            return Err(BackendError::InvalidParameter(format!(
                "instance {} is not registered with the remote execution agent",
                instance_id
            )));
        }

        push_bounded(
            &mut *self.sent_scripts.write().await,
            (instance_id.to_string(), script.to_string()),
        );

        let (remaining_polls, reply) = match self.find_fixture(instance_id, script) {
            Some(fixture) => (
                fixture.pending_polls,
                CommandInvocation {
                    status: fixture.status,
                    stdout: fixture.stdout.clone(),
                    stderr: fixture.stderr.clone(),
                },
            ),
            None => (
                0,
                CommandInvocation {
                    status: CommandStatus::Failed,
                    stdout: String::new(),
                    stderr: "command not recognized".to_string(),
                },
            ),
        };

        let command_id = self.next_id("cmd");
        self.in_flight.insert(
            command_id.clone(),
            InFlightCommand {
                instance_id: instance_id.to_string(),
                remaining_polls,
                reply,
            },
        );
        Ok(command_id)
    }

    async fn command_status(&self, command_id: &str, instance_id: &str) -> BackendResult<CommandInvocation> {
        {
            let mut entry = self
                .in_flight
                .get_mut(command_id)
                .filter(|c| c.instance_id == instance_id)
                .ok_or_else(|| BackendError::NotFound(format!("command {}", command_id)))?;

            if entry.remaining_polls > 0 {
                entry.remaining_polls -= 1;
                return Ok(CommandInvocation {
                    status: CommandStatus::InProgress,
                    stdout: String::new(),
                    stderr: String::new(),
                });
            }
            if !entry.reply.status.is_terminal() {
                return Ok(entry.reply.clone());
            }
        }

        // A finished command is reported once and then forgotten.
        self.in_flight
            .remove(command_id)
            .map(|(_, command)| command.reply)
            .ok_or_else(|| BackendError::NotFound(format!("command {}", command_id)))
    }
}

#[async_trait]
impl ActionService for SnapshotBackend {
    async fn create_snapshot(
        &self,
        volume_id: &str,
        description: &str,
        tags: &BTreeMap<String, String>,
    ) -> BackendResult<String> {
        self.check_failure(MutationKind::CreateSnapshot)?;
        if !self.volumes.read().await.contains_key(volume_id) {
            return Err(BackendError::NotFound(format!("volume {}", volume_id)));
        }

        let snapshot_id = self.next_id("snap");
        self.record(
            MutationKind::CreateSnapshot,
            volume_id,
            serde_json::json!({
                "snapshot_id": snapshot_id,
                "description": description,
                "tags": tags,
            }),
        )
        .await;
        Ok(snapshot_id)
    }

    async fn detach_volume(&self, volume_id: &str) -> BackendResult<()> {
        self.check_failure(MutationKind::Detach)?;
        let mut volumes = self.volumes.write().await;
        let volume = volumes
            .get_mut(volume_id)
            .ok_or_else(|| BackendError::NotFound(format!("volume {}", volume_id)))?;

        if volume.attachments.is_empty() {
            return Err(BackendError::IncorrectState(format!(
                "volume {} is not attached",
                volume_id
            )));
        }

        let detached: Vec<String> = volume
            .attachments
            .drain(..)
            .map(|a| a.instance_id)
            .collect();
        volume.state = VolumeState::Available;
        drop(volumes);

        if self.detach_race.load(Ordering::Relaxed) {
            return Err(BackendError::IncorrectState(format!(
                "volume {} is already detaching",
                volume_id
            )));
        }

        self.record(
            MutationKind::Detach,
            volume_id,
            serde_json::json!({ "instances": detached }),
        )
        .await;
        Ok(())
    }

    async fn attach_volume(&self, volume_id: &str, instance_id: &str, device: &str) -> BackendResult<()> {
        self.check_failure(MutationKind::Attach)?;
        if !self.instances.contains_key(instance_id) {
            return Err(BackendError::NotFound(format!("instance {}", instance_id)));
        }

        let mut volumes = self.volumes.write().await;
        let volume = volumes
            .get_mut(volume_id)
            .ok_or_else(|| BackendError::NotFound(format!("volume {}", volume_id)))?;

        if volume.state != VolumeState::Available {
            return Err(BackendError::IncorrectState(format!(
                "volume {} is not available",
                volume_id
            )));
        }

        volume.attachments.push(crate::models::Attachment {
            instance_id: instance_id.to_string(),
            device: device.to_string(),
            attach_time: Some(chrono::Utc::now()),
            state: "attached".to_string(),
            delete_on_termination: false,
        });
        volume.state = VolumeState::InUse;
        drop(volumes);

        self.record(
            MutationKind::Attach,
            volume_id,
            serde_json::json!({ "instance_id": instance_id, "device": device }),
        )
        .await;
        Ok(())
    }

    async fn delete_volume(&self, volume_id: &str) -> BackendResult<()> {
        self.check_failure(MutationKind::Delete)?;
        let mut volumes = self.volumes.write().await;
        let attached = match volumes.get(volume_id) {
            Some(volume) => !volume.attachments.is_empty(),
            None => return Err(BackendError::NotFound(format!("volume {}", volume_id))),
        };
        if attached {
            return Err(BackendError::IncorrectState(format!(
                "volume {} is still attached",
                volume_id
            )));
        }
        volumes.remove(volume_id);
        drop(volumes);

        self.record(MutationKind::Delete, volume_id, serde_json::Value::Null)
            .await;
        Ok(())
    }

    async fn modify_volume(&self, volume_id: &str, request: &ModifyRequest) -> BackendResult<()> {
        self.check_failure(MutationKind::Modify)?;
        let mut volumes = self.volumes.write().await;
        let volume = volumes
            .get_mut(volume_id)
            .ok_or_else(|| BackendError::NotFound(format!("volume {}", volume_id)))?;

        if let Some(size) = request.size_gb {
            if size < volume.size_gb {
                return Err(BackendError::InvalidParameter(format!(
                    "new size {} GB is smaller than current size {} GB",
                    size, volume.size_gb
                )));
            }
            volume.size_gb = size;
        }
        if let Some(class) = &request.volume_type {
            volume.volume_type = class.clone();
        }
        if request.iops.is_some() {
            volume.iops = request.iops;
        }
        if request.throughput.is_some() {
            volume.throughput = request.throughput;
        }
        drop(volumes);

        self.record(
            MutationKind::Modify,
            volume_id,
            serde_json::to_value(request).unwrap_or(serde_json::Value::Null),
        )
        .await;
        Ok(())
    }
}
