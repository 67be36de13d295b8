use super::*;
use crate::backend::{CloudSnapshot, MutationKind, SnapshotBackend};
use crate::models::{InstanceState, Platform};
use crate::testing::{attached, instance, volume};

fn executor(snapshot: CloudSnapshot) -> (Arc<SnapshotBackend>, RemediationExecutor) {
    executor_for(SnapshotBackend::from_snapshot(snapshot))
}

fn executor_for(backend: SnapshotBackend) -> (Arc<SnapshotBackend>, RemediationExecutor) {
    let backend = Arc::new(backend);
    let executor = RemediationExecutor::new(
        backend.clone(),
        backend.clone(),
        AuditLogger::new("us-east-1"),
    );
    (backend, executor)
}

fn snapshot(volumes: Vec<Volume>) -> CloudSnapshot {
    CloudSnapshot {
        volumes,
        instances: vec![instance("i-1", Platform::Linux)],
        ..Default::default()
    }
}

fn boot_volume() -> Volume {
    attached(volume("vol-root", VolumeClass::Gp2, 100), "i-1", "/dev/xvda", 90)
}

fn data_volume() -> Volume {
    let mut vol = attached(volume("vol-data", VolumeClass::Gp2, 500), "i-1", "/dev/xvdf", 90);
    vol.tags.insert("Name".to_string(), "reports".to_string());
    vol
}

fn kinds(mutations: &[crate::backend::RecordedMutation]) -> Vec<MutationKind> {
    mutations.iter().map(|m| m.kind).collect()
}

#[tokio::test]
async fn test_boot_volume_is_never_deleted() {
    let (backend, executor) = executor(snapshot(vec![boot_volume()]));

    let result = executor
        .execute("vol-root", &RemediationAction::SnapshotAndDelete)
        .await;

    assert_eq!(result.status, ExecutionStatus::SkippedRootVolume);
    assert!(!result.success);
    assert!(backend.mutations().await.is_empty());
}

#[tokio::test]
async fn test_boot_volume_is_never_shrunk() {
    let (backend, executor) = executor(snapshot(vec![boot_volume()]));

    let result = executor
        .execute("vol-root", &RemediationAction::Resize { target_size_gb: 20 })
        .await;

    assert_eq!(result.status, ExecutionStatus::SkippedRootVolumeResize);
    assert!(backend.mutations().await.is_empty());
}

#[tokio::test]
async fn test_boot_class_change_is_allowed() {
    let (backend, executor) = executor(snapshot(vec![boot_volume()]));

    let result = executor
        .execute(
            "vol-root",
            &RemediationAction::ChangeType {
                target_class: None,
                iops: None,
                throughput: None,
            },
        )
        .await;

    assert_eq!(result.status, ExecutionStatus::ModificationInitiated);
    assert_eq!(result.details["caution"], json!("boot volume"));
    assert_eq!(kinds(&backend.mutations().await), vec![MutationKind::Modify]);
}

#[tokio::test]
async fn test_unresolvable_boot_status_blocks_delete() {
    let backend = SnapshotBackend::from_snapshot(snapshot(vec![data_volume()]))
        .with_instance_failure("i-1", BackendError::Unavailable("throttled".to_string()));
    let (backend, executor) = executor_for(backend);

    let result = executor
        .execute("vol-data", &RemediationAction::SnapshotAndDelete)
        .await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert!(backend.mutations().await.is_empty());
}

#[tokio::test]
async fn test_snapshot_and_delete_attached_volume() {
    let (backend, executor) = executor(snapshot(vec![data_volume()]));

    let result = executor
        .execute("vol-data", &RemediationAction::SnapshotAndDelete)
        .await;

    assert!(result.success);
    assert_eq!(result.status, ExecutionStatus::DeleteInitiated);
    assert!(result.details.contains_key("snapshot_id"));

    let mutations = backend.mutations().await;
    assert_eq!(
        kinds(&mutations),
        vec![MutationKind::CreateSnapshot, MutationKind::Detach, MutationKind::Delete]
    );
    let tags = &mutations[0].detail["tags"];
    assert_eq!(tags["Name"], json!("AutoSnapshot-vol-data-snapshot_a"));
    assert_eq!(tags["AutoCreated"], json!("true"));
    assert_eq!(tags["TriggeringAction"], json!("snapshot_and_delete"));
    assert_eq!(tags["VolumeName"], json!("reports"));
}

#[tokio::test]
async fn test_failed_snapshot_stops_delete() {
    let backend = SnapshotBackend::from_snapshot(snapshot(vec![data_volume()])).with_mutation_failure(
        MutationKind::CreateSnapshot,
        BackendError::Unavailable("snapshot limit".to_string()),
    );
    let (backend, executor) = executor_for(backend);

    let result = executor
        .execute("vol-data", &RemediationAction::SnapshotAndDelete)
        .await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert!(backend.mutations().await.is_empty());
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let (backend, executor) = executor(snapshot(Vec::new()));

    let result = executor
        .execute("vol-gone", &RemediationAction::SnapshotAndDelete)
        .await;

    assert!(result.success);
    assert_eq!(result.status, ExecutionStatus::DeleteInitiated);
    assert_eq!(result.details["message"], json!("volume already deleted"));
    assert!(backend.mutations().await.is_empty());

    let other = executor
        .execute("vol-gone", &RemediationAction::SnapshotOnly)
        .await;
    assert_eq!(other.status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn test_detach_race_still_deletes() {
    let backend = SnapshotBackend::from_snapshot(snapshot(vec![data_volume()])).with_detach_race();
    let (backend, executor) = executor_for(backend);

    let result = executor
        .execute("vol-data", &RemediationAction::SnapshotAndDelete)
        .await;

    assert!(result.success);
    assert_eq!(result.status, ExecutionStatus::DeleteInitiated);
    assert!(!result.details.contains_key("detached"));
    assert_eq!(
        kinds(&backend.mutations().await),
        vec![MutationKind::CreateSnapshot, MutationKind::Delete]
    );
}

#[tokio::test]
async fn test_delete_refused_while_still_attached() {
    let backend = SnapshotBackend::from_snapshot(snapshot(vec![data_volume()])).with_mutation_failure(
        MutationKind::Detach,
        BackendError::IncorrectState("already detaching".to_string()),
    );
    let (backend, executor) = executor_for(backend);

    let result = executor
        .execute("vol-data", &RemediationAction::SnapshotAndDelete)
        .await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(
        kinds(&backend.mutations().await),
        vec![MutationKind::CreateSnapshot]
    );
}

#[tokio::test]
async fn test_shrink_is_rejected_without_mutation() {
    let (backend, executor) = executor(snapshot(vec![data_volume()]));

    let result = executor
        .execute("vol-data", &RemediationAction::Resize { target_size_gb: 100 })
        .await;
    assert_eq!(result.status, ExecutionStatus::Failed);

    let combined = executor
        .execute(
            "vol-data",
            &RemediationAction::ChangeTypeAndResize {
                target_class: Some(VolumeClass::Gp3),
                target_size_gb: 100,
                iops: None,
                throughput: None,
            },
        )
        .await;
    assert_eq!(combined.status, ExecutionStatus::Failed);
    assert!(backend.mutations().await.is_empty());
}

#[tokio::test]
async fn test_resize_to_same_size_is_no_change() {
    let (_, executor) = executor(snapshot(vec![data_volume()]));

    let result = executor
        .execute("vol-data", &RemediationAction::Resize { target_size_gb: 500 })
        .await;
    assert!(result.success);
    assert_eq!(result.status, ExecutionStatus::NoChangeNeeded);
}

#[tokio::test]
async fn test_change_type_defaults_and_clamps() {
    let mut io1 = attached(volume("vol-io", VolumeClass::Io1, 200), "i-1", "/dev/xvdg", 30);
    io1.iops = Some(20_000);
    let (backend, executor) = executor(snapshot(vec![io1]));

    let result = executor
        .execute(
            "vol-io",
            &RemediationAction::ChangeType {
                target_class: None,
                iops: None,
                throughput: None,
            },
        )
        .await;

    assert_eq!(result.status, ExecutionStatus::ModificationInitiated);
    let mutations = backend.mutations().await;
    assert_eq!(mutations[0].detail["volume_type"], json!("gp3"));
    assert_eq!(mutations[0].detail["iops"], json!(GP3_MAX_IOPS));
    assert_eq!(mutations[0].detail["throughput"], json!(125));
}

#[tokio::test]
async fn test_change_type_to_current_is_no_change() {
    let mut gp3 = volume("vol-gp3", VolumeClass::Gp3, 50);
    gp3.iops = Some(3000);
    gp3.throughput = Some(125);
    let (backend, executor) = executor(snapshot(vec![gp3]));

    let result = executor
        .execute(
            "vol-gp3",
            &RemediationAction::ChangeType {
                target_class: Some(VolumeClass::Gp3),
                iops: None,
                throughput: None,
            },
        )
        .await;

    assert_eq!(result.status, ExecutionStatus::NoChangeNeeded);
    assert!(backend.mutations().await.is_empty());
}

#[tokio::test]
async fn test_same_class_ignores_baseline_iops() {
    let mut gp2 = volume("vol-gp2", VolumeClass::Gp2, 100);
    gp2.iops = Some(300);
    let (backend, executor) = executor(snapshot(vec![gp2]));

    let result = executor
        .execute(
            "vol-gp2",
            &RemediationAction::ChangeType {
                target_class: Some(VolumeClass::Gp2),
                iops: None,
                throughput: None,
            },
        )
        .await;

    assert_eq!(result.status, ExecutionStatus::NoChangeNeeded);
    assert!(backend.mutations().await.is_empty());
}

#[tokio::test]
async fn test_same_class_retune_when_requested() {
    let mut gp3 = volume("vol-gp3", VolumeClass::Gp3, 50);
    gp3.iops = Some(6000);
    gp3.throughput = Some(250);
    let (backend, executor) = executor(snapshot(vec![gp3]));

    let result = executor
        .execute(
            "vol-gp3",
            &RemediationAction::ChangeType {
                target_class: Some(VolumeClass::Gp3),
                iops: Some(3000),
                throughput: None,
            },
        )
        .await;

    assert_eq!(result.status, ExecutionStatus::ModificationInitiated);
    let mutations = backend.mutations().await;
    assert_eq!(kinds(&mutations), vec![MutationKind::Modify]);
    assert_eq!(mutations[0].detail["iops"], json!(3000));
    assert_eq!(mutations[0].detail["throughput"], json!(250));
}

#[tokio::test]
async fn test_gp3_without_target_is_no_change() {
    let mut gp3 = volume("vol-gp3", VolumeClass::Gp3, 50);
    gp3.iops = Some(4000);
    gp3.throughput = Some(200);
    let (backend, executor) = executor(snapshot(vec![gp3]));

    let result = executor
        .execute(
            "vol-gp3",
            &RemediationAction::ChangeTypeAndResize {
                target_class: None,
                target_size_gb: 50,
                iops: None,
                throughput: None,
            },
        )
        .await;

    assert_eq!(result.status, ExecutionStatus::NoChangeNeeded);
    assert!(backend.mutations().await.is_empty());
}

#[tokio::test]
async fn test_grow_and_change_class_in_one_request() {
    let (backend, executor) = executor(snapshot(vec![data_volume()]));

    let result = executor
        .execute(
            "vol-data",
            &RemediationAction::ChangeTypeAndResize {
                target_class: Some(VolumeClass::Gp3),
                target_size_gb: 600,
                iops: None,
                throughput: None,
            },
        )
        .await;

    assert_eq!(result.status, ExecutionStatus::ModificationInitiated);
    let mutations = backend.mutations().await;
    assert_eq!(mutations.len(), 1);
    assert_eq!(mutations[0].detail["size_gb"], json!(600));
    assert_eq!(mutations[0].detail["volume_type"], json!("gp3"));
    assert_eq!(mutations[0].detail["iops"], json!(3000));
}

#[tokio::test]
async fn test_transport_failure_is_error() {
    let backend = SnapshotBackend::from_snapshot(snapshot(vec![volume("vol-a", VolumeClass::Gp2, 10)]))
        .with_mutation_failure(MutationKind::Modify, BackendError::Other("socket closed".to_string()));
    let (_, executor) = executor_for(backend);

    let result = executor
        .execute(
            "vol-a",
            &RemediationAction::ChangeType {
                target_class: Some(VolumeClass::Gp3),
                iops: None,
                throughput: None,
            },
        )
        .await;

    assert_eq!(result.status, ExecutionStatus::Error);
    assert!(!result.details["error"]
        .as_str()
        .unwrap_or_default()
        .contains("socket"));
}

#[tokio::test]
async fn test_stopped_instance_still_protects_boot() {
    let mut snapshot = snapshot(vec![boot_volume()]);
    snapshot.instances[0].state = InstanceState::Stopped;
    let (_, executor) = executor(snapshot);

    let result = executor
        .execute("vol-root", &RemediationAction::SnapshotAndDelete)
        .await;
    assert_eq!(result.status, ExecutionStatus::SkippedRootVolume);
}
