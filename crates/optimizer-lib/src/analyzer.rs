//! Analysis and execution entry points
//!
//! [`Engine::analyze`] classifies a set of volumes on a bounded pool of tokio
//! tasks and builds one recommendation per volume. [`Engine::execute`]
//! applies a single remediation.

use crate::backend::{Backends, VolumeFilter};
use crate::config::EngineConfig;
use crate::detector::{IdleDetector, IdleVerdict, OverprovisionedDetector, OverprovisionedVerdict};
use crate::error::EngineError;
use crate::executor::RemediationExecutor;
use crate::health::{components, HealthRegistry};
use crate::models::{
    AnalysisReport, AnalysisSummary, Classification, ExecutionResult, Recommendation,
    RemediationAction, Volume, VolumeClass,
};
use crate::observability::{AuditLogger, OptimizerMetrics};
use crate::pricing::{round_cents, CostEstimate, PriceTable};
use crate::telemetry::MetricWindow;
use crate::usage::{AcquisitionChain, ReachabilityCache};
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{error, info};

/// Build the recommendation for one volume from its verdicts
pub fn recommend(
    volume: &Volume,
    idle: IdleVerdict,
    overprovisioned: Option<OverprovisionedVerdict>,
) -> Recommendation {
    let mut rec = Recommendation {
        volume_id: volume.volume_id.clone(),
        name: volume.name().map(str::to_string),
        volume_type: volume.volume_type.clone(),
        size_gb: volume.size_gb,
        state: volume.state,
        classification: Classification::None,
        is_idle: idle.is_idle,
        is_overprovisioned: false,
        reason: idle.reason.clone(),
        current_monthly_cost: idle.current_monthly_cost,
        recommended_size_gb: None,
        recommended_class: None,
        recommended_iops: None,
        recommended_throughput: None,
        recommended_monthly_cost: None,
        estimated_monthly_savings: 0.0,
        suggested_action: None,
        disk_usage: None,
        metrics: idle.metrics.report_values(),
        error: None,
    };

    if idle.is_idle {
        rec.classification = Classification::Idle;
        rec.recommended_monthly_cost = Some(0.0);
        rec.estimated_monthly_savings = idle.estimated_monthly_savings;
        rec.suggested_action = Some(RemediationAction::SnapshotAndDelete);
        return rec;
    }

    let Some(verdict) = overprovisioned else {
        return rec;
    };

    rec.disk_usage = Some(verdict.disk_usage.clone());
    if !verdict.metrics.is_empty() {
        rec.metrics = verdict.metrics.report_values();
    }
    if !verdict.is_overprovisioned {
        rec.reason = format!("{} / {}", idle.reason, verdict.reason);
        return rec;
    }

    let changes = verdict.changes(volume);
    rec.is_overprovisioned = true;
    rec.classification = if verdict.size.is_overprovisioned {
        Classification::OverprovisionedSize
    } else {
        Classification::OverprovisionedPerformance
    };
    rec.reason = verdict.reason.clone();
    rec.recommended_size_gb = Some(verdict.recommended_size_gb);
    rec.recommended_class = Some(verdict.recommended_class.clone());
    rec.recommended_iops = verdict.recommended_iops;
    rec.recommended_throughput = verdict.recommended_throughput;
    rec.recommended_monthly_cost = verdict.recommended_monthly_cost;
    rec.estimated_monthly_savings = verdict.estimated_monthly_savings;
    rec.suggested_action = suggested_action(volume, &verdict, changes);
    rec
}

fn suggested_action(
    volume: &Volume,
    verdict: &OverprovisionedVerdict,
    changes: bool,
) -> Option<RemediationAction> {
    if !changes {
        return None;
    }
    let class_changes = verdict.recommended_class != volume.volume_type;
    if verdict.size.is_overprovisioned && class_changes {
        Some(RemediationAction::ChangeTypeAndResize {
            target_class: Some(verdict.recommended_class.clone()),
            target_size_gb: verdict.recommended_size_gb,
            iops: verdict.recommended_iops,
            throughput: verdict.recommended_throughput,
        })
    } else if verdict.size.is_overprovisioned {
        Some(RemediationAction::Resize {
            target_size_gb: verdict.recommended_size_gb,
        })
    } else {
        Some(RemediationAction::ChangeType {
            target_class: Some(verdict.recommended_class.clone()),
            iops: verdict.recommended_iops,
            throughput: verdict.recommended_throughput,
        })
    }
}

fn failed_recommendation(volume: &Volume, message: String) -> Recommendation {
    Recommendation {
        volume_id: volume.volume_id.clone(),
        name: volume.name().map(str::to_string),
        volume_type: volume.volume_type.clone(),
        size_gb: volume.size_gb,
        state: volume.state,
        classification: Classification::None,
        is_idle: false,
        is_overprovisioned: false,
        reason: "analysis failed".to_string(),
        current_monthly_cost: None,
        recommended_size_gb: None,
        recommended_class: None,
        recommended_iops: None,
        recommended_throughput: None,
        recommended_monthly_cost: None,
        estimated_monthly_savings: 0.0,
        suggested_action: None,
        disk_usage: None,
        metrics: Default::default(),
        error: Some(message),
    }
}

/// Counts and total savings over a set of recommendations
pub fn summarize(results: &[Recommendation]) -> AnalysisSummary {
    AnalysisSummary {
        total_volumes: results.len(),
        idle_count: results.iter().filter(|r| r.is_idle).count(),
        overprovisioned_count: results.iter().filter(|r| r.is_overprovisioned).count(),
        error_count: results.iter().filter(|r| r.error.is_some()).count(),
        estimated_monthly_savings: round_cents(
            results.iter().map(|r| r.estimated_monthly_savings).sum(),
        ),
    }
}

/// The decision engine
pub struct Engine {
    config: EngineConfig,
    backends: Backends,
    pricing: PriceTable,
    idle: Arc<IdleDetector>,
    overprovisioned: Arc<OverprovisionedDetector>,
    executor: RemediationExecutor,
    health: Option<HealthRegistry>,
    metrics: OptimizerMetrics,
    audit: AuditLogger,
}

impl Engine {
    pub fn new(config: EngineConfig, backends: Backends) -> Self {
        let pricing = config.price_table();
        let audit = AuditLogger::new(config.region.clone());

        let idle = IdleDetector::new(
            backends.telemetry.clone(),
            config.idle.clone(),
            pricing.clone(),
            config.region.clone(),
        );
        let overprovisioned = OverprovisionedDetector::new(
            backends.telemetry.clone(),
            AcquisitionChain::standard(&backends, config.remote_command.clone()),
            config.overprovisioned.clone(),
            pricing.clone(),
            config.region.clone(),
        );
        let executor = RemediationExecutor::new(
            backends.inventory.clone(),
            backends.actions.clone(),
            audit.clone(),
        );

        Self {
            config,
            backends,
            pricing,
            idle: Arc::new(idle),
            overprovisioned: Arc::new(overprovisioned),
            executor,
            health: None,
            metrics: OptimizerMetrics::new(),
            audit,
        }
    }

    /// Report inventory outcomes to `health`
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Analyze the named volumes, or every volume when `volume_ids` is empty
    pub async fn analyze(&self, volume_ids: &[String]) -> Result<AnalysisReport, EngineError> {
        let started = Instant::now();

        let filter = VolumeFilter::ids(volume_ids.iter().cloned());
        let listed = self.backends.inventory.list_volumes(&filter).await;
        if let Some(health) = &self.health {
            health.observe(components::INVENTORY, &listed).await;
        }
        let volumes = listed?;

        if !volume_ids.is_empty() {
            let found: BTreeSet<&str> = volumes.iter().map(|v| v.volume_id.as_str()).collect();
            let unknown: Vec<String> = volume_ids
                .iter()
                .filter(|id| !found.contains(id.as_str()))
                .cloned()
                .collect();
            if !unknown.is_empty() {
                return Err(EngineError::UnknownVolumes(unknown));
            }
        }

        info!(volumes = volumes.len(), region = %self.config.region, "Starting volume analysis");

        let idle_window =
            MetricWindow::last_days(self.config.idle.days_to_check, self.config.metric_period_secs);
        let over_window = MetricWindow::last_days(
            self.config.overprovisioned.days_to_check,
            self.config.metric_period_secs,
        );
        let reachability = Arc::new(ReachabilityCache::new());
        let permits = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));

        let mut handles = Vec::with_capacity(volumes.len());
        for volume in volumes {
            let idle = self.idle.clone();
            let overprovisioned = self.overprovisioned.clone();
            let reachability = reachability.clone();
            let permits = permits.clone();
            let task_volume = volume.clone();

            let handle = tokio::spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| EngineError::Worker(e.to_string()))?;

                let idle_verdict = idle.evaluate(&task_volume, &idle_window).await;
                let over_verdict = if idle_verdict.is_idle {
                    None
                } else {
                    overprovisioned
                        .evaluate(&task_volume, &over_window, &reachability)
                        .await
                };
                Ok::<_, EngineError>(recommend(&task_volume, idle_verdict, over_verdict))
            });
            handles.push((volume, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (volume, handle) in handles {
            let rec = match handle.await {
                Ok(Ok(rec)) => rec,
                Ok(Err(e)) => failed_recommendation(&volume, e.to_string()),
                Err(e) => {
                    error!(volume_id = %volume.volume_id, error = %e, "Volume analysis task failed");
                    failed_recommendation(&volume, EngineError::Worker(e.to_string()).to_string())
                }
            };
            results.push(rec);
        }

        let summary = summarize(&results);
        let elapsed = started.elapsed().as_secs_f64();
        self.metrics.observe_analysis_latency(elapsed);
        self.metrics.record_summary(&summary);
        self.audit.log_analysis(&summary, elapsed);

        Ok(AnalysisReport {
            region: self.config.region.clone(),
            generated_at: Utc::now(),
            summary,
            results,
        })
    }

    /// Apply one remediation; never fails, the outcome is in the result
    pub async fn execute(&self, volume_id: &str, action: &RemediationAction) -> ExecutionResult {
        self.executor.execute(volume_id, action).await
    }

    /// Monthly cost estimate in `region` (the engine's region when unset)
    pub fn estimate_cost(
        &self,
        size_gb: u64,
        class: &VolumeClass,
        region: Option<&str>,
        iops: Option<f64>,
        throughput: Option<f64>,
    ) -> Option<CostEstimate> {
        let region = region.unwrap_or(&self.config.region);
        self.pricing
            .estimate_monthly_cost(size_gb, class, region, iops, throughput)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CloudSnapshot, MutationKind, SnapshotBackend};
    use crate::models::{ExecutionStatus, Platform};
    use crate::telemetry::MetricName;
    use crate::testing::{
        attached, command, daily_sums, df_output, fast_poll, filesystem, instance, set_metric,
        snapshot_with_instances, volume,
    };

    fn engine(snapshot: CloudSnapshot) -> (Arc<SnapshotBackend>, Engine) {
        let backend = Arc::new(SnapshotBackend::from_snapshot(snapshot));
        let config = EngineConfig {
            remote_command: fast_poll(),
            max_concurrency: 2,
            ..Default::default()
        };
        (backend.clone(), Engine::new(config, Backends::shared(backend)))
    }

    fn fleet() -> CloudSnapshot {
        let mut snapshot = snapshot_with_instances(vec![instance("i-1", Platform::Linux)]);
        snapshot.volumes = vec![
            volume("vol-unattached", VolumeClass::Gp2, 100),
            attached(volume("vol-oversized", VolumeClass::Gp2, 100), "i-1", "/dev/xvdf", 60),
            attached(volume("vol-busy", VolumeClass::Gp2, 50), "i-1", "/dev/xvda", 60),
        ];
        snapshot
            .filesystems
            .insert("i-1".to_string(), vec![filesystem("/data", Some("xvdf"), 10.0)]);
        set_metric(&mut snapshot, "vol-oversized", MetricName::VolumeIdleTime, daily_sums(30, 40_000.0));
        set_metric(&mut snapshot, "vol-busy", MetricName::VolumeIdleTime, daily_sums(30, 1_000.0));
        snapshot.commands.push(command("df -P '/'", &df_output("/", 70)));
        snapshot
    }

    #[tokio::test]
    async fn test_analyze_classifies_fleet() {
        let (_, engine) = engine(fleet());

        let report = engine.analyze(&[]).await.unwrap();

        assert_eq!(report.summary.total_volumes, 3);
        assert_eq!(report.summary.idle_count, 1);
        assert_eq!(report.summary.overprovisioned_count, 1);
        assert_eq!(report.summary.error_count, 0);
        assert_eq!(report.summary.estimated_monthly_savings, 18.0);

        let by_id = |id: &str| {
            report
                .results
                .iter()
                .find(|r| r.volume_id == id)
                .cloned()
                .unwrap()
        };

        let idle = by_id("vol-unattached");
        assert_eq!(idle.classification, Classification::Idle);
        assert_eq!(idle.suggested_action, Some(RemediationAction::SnapshotAndDelete));
        assert_eq!(idle.estimated_monthly_savings, 10.0);

        let oversized = by_id("vol-oversized");
        assert_eq!(oversized.classification, Classification::OverprovisionedSize);
        assert_eq!(oversized.recommended_size_gb, Some(20));
        assert_eq!(
            oversized.suggested_action,
            Some(RemediationAction::Resize { target_size_gb: 20 })
        );

        let busy = by_id("vol-busy");
        assert_eq!(busy.classification, Classification::None);
        assert_eq!(busy.disk_usage.and_then(|u| u.used_percent()), Some(70.0));
    }

    #[tokio::test]
    async fn test_analyze_only_named_volumes() {
        let (_, engine) = engine(fleet());

        let ids = vec!["vol-busy".to_string(), "vol-unattached".to_string()];
        let report = engine.analyze(&ids).await.unwrap();

        assert_eq!(report.summary.total_volumes, 2);
        assert!(report
            .results
            .iter()
            .all(|r| r.volume_id != "vol-oversized"));
    }

    #[tokio::test]
    async fn test_analyze_rejects_unknown_ids() {
        let (_, engine) = engine(fleet());

        let result = engine.analyze(&["vol-nope".to_string()]).await;
        assert!(matches!(result, Err(EngineError::UnknownVolumes(ids)) if ids == vec!["vol-nope".to_string()]));
    }

    #[tokio::test]
    async fn test_analysis_never_mutates() {
        let (backend, engine) = engine(fleet());
        engine.analyze(&[]).await.unwrap();
        assert!(backend.mutations().await.is_empty());
    }

    #[tokio::test]
    async fn test_execute_suggested_action() {
        let (backend, engine) = engine(fleet());
        let report = engine.analyze(&["vol-unattached".to_string()]).await.unwrap();
        let action = report.results[0].suggested_action.clone().unwrap();

        let result = engine.execute("vol-unattached", &action).await;

        assert_eq!(result.status, ExecutionStatus::DeleteInitiated);
        let kinds: Vec<MutationKind> = backend.mutations().await.iter().map(|m| m.kind).collect();
        assert_eq!(kinds, vec![MutationKind::CreateSnapshot, MutationKind::Delete]);
    }

    #[test]
    fn test_estimate_cost_falls_back_to_default_region() {
        let (_, engine) = engine(CloudSnapshot::default());
        let estimate = engine
            .estimate_cost(100, &VolumeClass::Gp3, Some("mars-north-1"), None, None)
            .unwrap();
        assert_eq!(estimate.monthly_cost, 8.0);
        assert_eq!(estimate.priced_region, "default");
    }

    #[test]
    fn test_summarize_rounds_savings() {
        let vol = volume("vol-1", VolumeClass::Gp2, 10);
        let mut a = failed_recommendation(&vol, "boom".to_string());
        a.estimated_monthly_savings = 0.105;
        let mut b = failed_recommendation(&vol, "boom".to_string());
        b.estimated_monthly_savings = 0.2;

        let summary = summarize(&[a, b]);
        assert_eq!(summary.error_count, 2);
        assert_eq!(summary.estimated_monthly_savings, 0.31);
    }
}
