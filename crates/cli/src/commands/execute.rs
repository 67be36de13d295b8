//! Remediation command

use anyhow::{bail, Result};
use clap::ValueEnum;
use colored::Colorize;

use crate::client::{Action, ApiClient, ExecutionResult};
use crate::output::{
    color_status, print_error, print_json, print_success, print_warning, OutputFormat,
};

/// Remediation kinds accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ActionKind {
    /// Snapshot the volume and keep it
    SnapshotOnly,
    /// Snapshot, detach if attached, then delete
    SnapshotAndDelete,
    /// Change the volume class (default gp3)
    ChangeType,
    /// Grow the volume
    Resize,
    /// Change class and size in one request
    ChangeTypeAndResize,
}

/// Optional parameters shared by the modifying actions
#[derive(Debug, Clone, Default)]
pub struct ActionParams {
    pub target_size_gb: Option<u64>,
    pub target_class: Option<String>,
    pub iops: Option<u32>,
    pub throughput: Option<u32>,
}

/// Build the request body for an action, rejecting missing parameters
pub fn build_action(kind: ActionKind, params: ActionParams) -> Result<Action> {
    let action = match kind {
        ActionKind::SnapshotOnly => Action::SnapshotOnly,
        ActionKind::SnapshotAndDelete => Action::SnapshotAndDelete,
        ActionKind::ChangeType => Action::ChangeType {
            target_class: params.target_class,
            iops: params.iops,
            throughput: params.throughput,
        },
        ActionKind::Resize => match params.target_size_gb {
            Some(target_size_gb) => Action::Resize { target_size_gb },
            None => bail!("--target-size is required for resize"),
        },
        ActionKind::ChangeTypeAndResize => match params.target_size_gb {
            Some(target_size_gb) => Action::ChangeTypeAndResize {
                target_class: params.target_class,
                target_size_gb,
                iops: params.iops,
                throughput: params.throughput,
            },
            None => bail!("--target-size is required for change-type-and-resize"),
        },
    };
    Ok(action)
}

/// Execute one remediation and print the outcome
pub async fn run(
    client: &ApiClient,
    volume_id: &str,
    kind: ActionKind,
    params: ActionParams,
    format: OutputFormat,
) -> Result<()> {
    let action = build_action(kind, params)?;
    let result = client.execute(volume_id, action).await?;

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Table => print_result(&result),
    }

    if !result.success && !is_skipped(&result.status) {
        bail!("remediation of {} ended with status {}", volume_id, result.status);
    }
    Ok(())
}

/// Boot-volume refusals are expected outcomes, not failures
fn is_skipped(status: &str) -> bool {
    matches!(status, "skipped_root_volume" | "skipped_root_volume_resize")
}

fn print_result(result: &ExecutionResult) {
    let headline = format!(
        "{} on {}: {}",
        result.action_type,
        result.volume_id,
        color_status(&result.status)
    );
    if is_skipped(&result.status) {
        print_warning(&headline);
    } else if result.success {
        print_success(&headline);
    } else {
        print_error(&headline);
    }

    for (key, value) in &result.details {
        let value = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        println!("  {:<22} {}", format!("{}:", key).dimmed(), value);
    }
}
