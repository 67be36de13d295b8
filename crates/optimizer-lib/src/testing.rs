//! Fixture builders shared by unit tests

use crate::backend::{AgentStatus, CloudSnapshot, CommandFixture, CommandStatus, FilesystemSeries};
use crate::config::PollSettings;
use crate::models::{
    Attachment, InstanceInfo, InstanceState, Platform, Volume, VolumeClass, VolumeState,
};
use crate::telemetry::{Datapoint, MetricName};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

pub const DAY_SECS: f64 = 86_400.0;

pub fn fast_poll() -> PollSettings {
    PollSettings {
        poll_interval_ms: 1,
        max_attempts: 3,
    }
}

pub fn volume(id: &str, class: VolumeClass, size_gb: u64) -> Volume {
    Volume {
        volume_id: id.to_string(),
        volume_type: class,
        size_gb,
        iops: None,
        throughput: None,
        state: VolumeState::Available,
        attachments: Vec::new(),
        tags: BTreeMap::new(),
        availability_zone: Some("us-east-1a".to_string()),
        create_time: None,
        encrypted: false,
    }
}

pub fn attached(mut volume: Volume, instance_id: &str, device: &str, attached_days_ago: i64) -> Volume {
    volume.state = VolumeState::InUse;
    volume.attachments.push(Attachment {
        instance_id: instance_id.to_string(),
        device: device.to_string(),
        attach_time: Some(Utc::now() - Duration::days(attached_days_ago)),
        state: "attached".to_string(),
        delete_on_termination: false,
    });
    volume
}

pub fn instance(id: &str, platform: Platform) -> InstanceInfo {
    InstanceInfo {
        instance_id: id.to_string(),
        state: InstanceState::Running,
        platform,
        root_device_name: Some("/dev/xvda".to_string()),
    }
}

fn day(n: i64) -> DateTime<Utc> {
    Utc::now() - Duration::days(n)
}

/// Daily datapoints with a constant per-period sum
pub fn daily_sums(days: i64, sum: f64) -> Vec<Datapoint> {
    (0..days)
        .map(|n| Datapoint {
            timestamp: day(n + 1),
            average: sum / 1440.0,
            maximum: sum / 1440.0,
            minimum: 0.0,
            sum,
            sample_count: 1440.0,
        })
        .collect()
}

/// Daily datapoints of a percentage gauge
pub fn daily_percent(days: i64, percent: f64) -> Vec<Datapoint> {
    (0..days)
        .map(|n| Datapoint {
            timestamp: day(n + 1),
            average: percent,
            maximum: percent,
            minimum: percent,
            sum: percent,
            sample_count: 1.0,
        })
        .collect()
}

pub fn filesystem(path: &str, device: Option<&str>, percent: f64) -> FilesystemSeries {
    FilesystemSeries {
        path: path.to_string(),
        device: device.map(str::to_string),
        fstype: Some("xfs".to_string()),
        datapoints: daily_percent(3, percent),
    }
}

pub fn command(script_contains: &str, stdout: &str) -> CommandFixture {
    CommandFixture {
        instance_id: None,
        script_contains: script_contains.to_string(),
        status: CommandStatus::Success,
        stdout: stdout.to_string(),
        stderr: String::new(),
        pending_polls: 0,
    }
}

pub fn df_output(mount: &str, percent: u32) -> String {
    format!(
        "Filesystem 1024-blocks Used Available Capacity Mounted on\n/dev/root 104857600 1 1 {}% {}\n",
        percent, mount
    )
}

/// Snapshot with the given instances online for remote commands
pub fn snapshot_with_instances(instances: Vec<InstanceInfo>) -> CloudSnapshot {
    let agents = instances
        .iter()
        .map(|i| (i.instance_id.clone(), AgentStatus::Online))
        .collect();
    CloudSnapshot {
        instances,
        agents,
        ..Default::default()
    }
}

pub fn set_metric(snapshot: &mut CloudSnapshot, volume_id: &str, metric: MetricName, points: Vec<Datapoint>) {
    snapshot
        .volume_metrics
        .entry(volume_id.to_string())
        .or_default()
        .insert(metric, points);
}
