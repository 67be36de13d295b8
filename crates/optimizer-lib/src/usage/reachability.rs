//! Per-run cache of instance reachability for remote commands

use crate::backend::{AgentStatus, InventoryService, RemoteExecService};
use crate::error::BackendResult;
use crate::models::{InstanceState, Platform};
use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

/// Whether remote commands can be sent to an instance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reachability {
    pub platform: Platform,
    pub reachable: bool,
    /// Why the instance cannot be reached
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Instance id -> reachability, scoped to one analysis pass
///
/// Only resolved verdicts are cached; lookup errors are retried by the
/// next caller.
#[derive(Debug, Default)]
pub struct ReachabilityCache {
    entries: DashMap<String, Reachability>,
}

impl ReachabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, instance_id: &str) -> Option<Reachability> {
        self.entries.get(instance_id).map(|r| r.value().clone())
    }

    /// Cached verdict, or resolve via inventory and remote execution status
    pub async fn resolve(
        &self,
        instance_id: &str,
        inventory: &dyn InventoryService,
        remote: &dyn RemoteExecService,
    ) -> BackendResult<Reachability> {
        if let Some(cached) = self.get(instance_id) {
            return Ok(cached);
        }

        let instance = inventory.get_instance(instance_id).await?;
        let verdict = if instance.state != InstanceState::Running {
            Reachability {
                platform: instance.platform,
                reachable: false,
                reason: Some(format!("instance state is {:?}", instance.state)),
            }
        } else {
            match remote.agent_status(instance_id).await? {
                AgentStatus::Online => Reachability {
                    platform: instance.platform,
                    reachable: true,
                    reason: None,
                },
                status => Reachability {
                    platform: instance.platform,
                    reachable: false,
                    reason: Some(format!("remote execution agent is {:?}", status)),
                },
            }
        };

        debug!(
            instance_id = %instance_id,
            reachable = verdict.reachable,
            "Resolved instance reachability"
        );
        self.entries.insert(instance_id.to_string(), verdict.clone());
        Ok(verdict)
    }
}
