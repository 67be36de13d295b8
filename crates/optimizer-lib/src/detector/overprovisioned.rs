//! Overprovisioned volume detection
//!
//! Two independent sub-decisions feed one verdict:
//! - size: filled percentage from the acquisition chain against the volume size
//! - performance: observed IOPS and throughput against what is provisioned
//!
//! Only attached, in-use volumes are evaluated. Single-volume and batch
//! callers get the same verdict type.

use super::collect_volume_metrics;
use crate::backend::TelemetryService;
use crate::config::OverprovisionedCriteria;
use crate::models::{
    DiskUsage, Volume, VolumeClass, VolumeState, GP3_MAX_IOPS, GP3_MAX_THROUGHPUT,
    GP3_MIN_IOPS, GP3_MIN_THROUGHPUT, PIOPS_MIN_IOPS,
};
use crate::observability::OptimizerMetrics;
use crate::pricing::{round_cents, PriceTable};
use crate::telemetry::{MetricWindow, VolumeMetrics};
use crate::usage::{AcquisitionChain, ReachabilityCache, UsageRequest};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Size half of the verdict
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SizeDecision {
    pub is_overprovisioned: bool,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_gb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_gb: Option<f64>,
    /// Only set when the volume is flagged
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_size_gb: Option<u64>,
}

impl SizeDecision {
    fn not_flagged(reason: impl Into<String>) -> Self {
        Self {
            is_overprovisioned: false,
            reason: reason.into(),
            used_percent: None,
            used_gb: None,
            free_gb: None,
            recommended_size_gb: None,
        }
    }
}

/// Used space plus the larger of the ratio buffer and the fixed buffer,
/// rounded to whole GB and never below 1 GB
pub fn recommended_size_gb(used_gb: f64, criteria: &OverprovisionedCriteria) -> u64 {
    let buffer = (used_gb * criteria.buffer_ratio).max(criteria.min_buffer_gb);
    ((used_gb + buffer).round() as u64).max(1)
}

/// Decide whether a volume is larger than its contents need
pub fn size_decision(
    size_gb: u64,
    usage: &DiskUsage,
    criteria: &OverprovisionedCriteria,
) -> SizeDecision {
    let Some(used_percent) = usage.used_percent() else {
        return SizeDecision::not_flagged("usage data unavailable");
    };

    let size = size_gb as f64;
    let used_gb = size * used_percent / 100.0;
    let free_gb = size - used_gb;
    let mut decision = SizeDecision {
        is_overprovisioned: false,
        reason: String::new(),
        used_percent: Some(used_percent),
        used_gb: Some(used_gb),
        free_gb: Some(free_gb),
        recommended_size_gb: None,
    };

    if used_percent >= criteria.low_usage_threshold_percent {
        decision.reason = format!(
            "usage {:.1}% at or above {}%",
            used_percent, criteria.low_usage_threshold_percent
        );
        return decision;
    }
    if free_gb <= criteria.min_free_space_gb {
        decision.reason = format!(
            "only {:.1} GB free, need more than {} GB to shrink",
            free_gb, criteria.min_free_space_gb
        );
        return decision;
    }

    let recommended = recommended_size_gb(used_gb, criteria);
    let reduction = size_gb.saturating_sub(recommended) as f64;
    let reduction_percent = if size_gb > 0 {
        reduction / size * 100.0
    } else {
        0.0
    };

    if recommended >= size_gb
        || reduction < criteria.min_reduction_gb
        || reduction_percent < criteria.min_reduction_percent
    {
        decision.reason = format!(
            "usage {:.1}% is low but resizing to {} GB saves too little",
            used_percent, recommended
        );
        return decision;
    }

    decision.is_overprovisioned = true;
    decision.recommended_size_gb = Some(recommended);
    decision.reason = format!(
        "usage {:.1}% with {:.1} GB free, {} GB is enough",
        used_percent, free_gb, recommended
    );
    decision
}

/// Performance half of the verdict
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceDecision {
    pub is_overprovisioned: bool,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iops_utilization_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throughput_utilization_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_class: Option<VolumeClass>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_iops: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_throughput: Option<u32>,
}

fn utilization(observed: Option<f64>, provisioned: Option<u32>) -> Option<f64> {
    match (observed, provisioned) {
        (Some(used), Some(prov)) if prov > 0 => Some(used / f64::from(prov) * 100.0),
        _ => None,
    }
}

fn buffered(peak: f64, criteria: &OverprovisionedCriteria) -> u32 {
    (peak.max(0.0) * (1.0 + criteria.buffer_ratio)).ceil() as u32
}

/// Decide whether provisioned IOPS or throughput exceed observed demand
pub fn performance_decision(
    volume: &Volume,
    metrics: &VolumeMetrics,
    criteria: &OverprovisionedCriteria,
) -> PerformanceDecision {
    let class = &volume.volume_type;

    let iops_util = if class.is_iops_billed() {
        utilization(metrics.average_iops(), volume.iops)
    } else {
        None
    };
    let tp_util = if class.is_throughput_billed() {
        utilization(metrics.average_throughput_mibps(), volume.throughput)
    } else {
        None
    };

    let iops_low = iops_util.is_some_and(|u| u < criteria.iops_usage_threshold_percent);
    let tp_low = tp_util.is_some_and(|u| u < criteria.throughput_usage_threshold_percent);

    let mut reasons = Vec::new();
    if let (true, Some(u)) = (iops_low, iops_util) {
        reasons.push(format!(
            "average IOPS utilization {:.2}% below {}%",
            u, criteria.iops_usage_threshold_percent
        ));
    }
    if let (true, Some(u)) = (tp_low, tp_util) {
        reasons.push(format!(
            "average throughput utilization {:.2}% below {}%",
            u, criteria.throughput_usage_threshold_percent
        ));
    }

    let mut decision = PerformanceDecision {
        is_overprovisioned: !reasons.is_empty(),
        reason: String::new(),
        iops_utilization_percent: iops_util,
        throughput_utilization_percent: tp_util,
        recommended_class: None,
        recommended_iops: None,
        recommended_throughput: None,
    };
    if reasons.is_empty() {
        decision.reason = "performance not overprovisioned".to_string();
        return decision;
    }
    decision.reason = reasons.join(" / ");

    let peak_iops = metrics
        .peak_iops()
        .or_else(|| metrics.average_iops())
        .unwrap_or(0.0);
    let peak_tp = metrics
        .peak_throughput_mibps()
        .or_else(|| metrics.average_throughput_mibps())
        .unwrap_or(0.0);
    let want_iops = buffered(peak_iops, criteria);
    let want_tp = buffered(peak_tp, criteria);

    match class {
        VolumeClass::Gp3 => {
            decision.recommended_class = Some(VolumeClass::Gp3);
            decision.recommended_iops = volume.iops.map(|prov| {
                if iops_low {
                    want_iops.max(GP3_MIN_IOPS).min(prov.max(GP3_MIN_IOPS))
                } else {
                    prov
                }
            });
            decision.recommended_throughput = volume.throughput.map(|prov| {
                if tp_low {
                    want_tp.max(GP3_MIN_THROUGHPUT).min(prov.max(GP3_MIN_THROUGHPUT))
                } else {
                    prov
                }
            });
        }
        VolumeClass::Io1 | VolumeClass::Io2
            if want_iops <= GP3_MAX_IOPS && want_tp <= GP3_MAX_THROUGHPUT =>
        {
            decision.recommended_class = Some(VolumeClass::Gp3);
            decision.recommended_iops = Some(want_iops.max(GP3_MIN_IOPS));
            decision.recommended_throughput = Some(want_tp.max(GP3_MIN_THROUGHPUT));
        }
        _ => {
            decision.recommended_class = Some(class.clone());
            decision.recommended_iops = volume
                .iops
                .map(|prov| want_iops.max(PIOPS_MIN_IOPS).min(prov.max(PIOPS_MIN_IOPS)));
        }
    }
    decision
}

/// Outcome of overprovisioning detection for one attached volume
#[derive(Debug, Clone, Serialize)]
pub struct OverprovisionedVerdict {
    pub volume_id: String,
    pub instance_id: String,
    pub device: String,
    pub is_overprovisioned: bool,
    /// Size reason first, then performance
    pub reason: String,
    pub size: SizeDecision,
    pub performance: PerformanceDecision,
    pub disk_usage: DiskUsage,
    pub metrics: VolumeMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_monthly_cost: Option<f64>,
    pub recommended_size_gb: u64,
    pub recommended_class: VolumeClass,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_iops: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_throughput: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_monthly_cost: Option<f64>,
    pub estimated_monthly_savings: f64,
}

impl OverprovisionedVerdict {
    /// Whether the recommendation differs from the current configuration
    pub fn changes(&self, volume: &Volume) -> bool {
        self.recommended_size_gb != volume.size_gb
            || self.recommended_class != volume.volume_type
            || self.recommended_iops != volume.iops
            || self.recommended_throughput != volume.throughput
    }
}

/// Whether a volume is eligible for overprovisioning analysis
pub fn is_eligible(volume: &Volume) -> bool {
    volume.state == VolumeState::InUse && !volume.attachments.is_empty()
}

/// Flags attached volumes whose size or performance exceeds demand
pub struct OverprovisionedDetector {
    telemetry: Arc<dyn TelemetryService>,
    chain: AcquisitionChain,
    criteria: OverprovisionedCriteria,
    pricing: PriceTable,
    region: String,
    metrics: OptimizerMetrics,
}

impl OverprovisionedDetector {
    pub fn new(
        telemetry: Arc<dyn TelemetryService>,
        chain: AcquisitionChain,
        criteria: OverprovisionedCriteria,
        pricing: PriceTable,
        region: impl Into<String>,
    ) -> Self {
        Self {
            telemetry,
            chain,
            criteria,
            pricing,
            region: region.into(),
            metrics: OptimizerMetrics::new(),
        }
    }

    pub fn criteria(&self) -> &OverprovisionedCriteria {
        &self.criteria
    }

    /// Verdicts for eligible volumes, in input order
    pub async fn detect(
        &self,
        volumes: &[Volume],
        window: &MetricWindow,
        reachability: &ReachabilityCache,
    ) -> Vec<OverprovisionedVerdict> {
        let mut verdicts = Vec::new();
        for volume in volumes {
            if let Some(verdict) = self.evaluate(volume, window, reachability).await {
                verdicts.push(verdict);
            }
        }
        verdicts
    }

    /// Verdict for one volume; `None` when the volume is not eligible
    pub async fn evaluate(
        &self,
        volume: &Volume,
        window: &MetricWindow,
        reachability: &ReachabilityCache,
    ) -> Option<OverprovisionedVerdict> {
        if !is_eligible(volume) {
            debug!(volume_id = %volume.volume_id, state = ?volume.state, "Skipping overprovisioning check");
            return None;
        }
        let attachment = volume.primary_attachment()?;

        let disk_usage = self
            .chain
            .get_disk_usage(&UsageRequest {
                instance_id: &attachment.instance_id,
                device: &attachment.device,
                window,
                reachability,
            })
            .await;
        if let DiskUsage::Unavailable { reason } = &disk_usage {
            self.metrics.inc_usage_unavailable();
            info!(volume_id = %volume.volume_id, reason = %reason, "Disk usage unavailable, skipping size check");
        }

        let metrics = collect_volume_metrics(self.telemetry.as_ref(), volume, window).await;
        let size = size_decision(volume.size_gb, &disk_usage, &self.criteria);
        let performance = performance_decision(volume, &metrics, &self.criteria);

        Some(self.verdict(volume, &attachment.instance_id, &attachment.device, size, performance, disk_usage, metrics))
    }

    #[allow(clippy::too_many_arguments)]
    fn verdict(
        &self,
        volume: &Volume,
        instance_id: &str,
        device: &str,
        size: SizeDecision,
        performance: PerformanceDecision,
        disk_usage: DiskUsage,
        metrics: VolumeMetrics,
    ) -> OverprovisionedVerdict {
        let is_overprovisioned = size.is_overprovisioned || performance.is_overprovisioned;

        let recommended_size_gb = size.recommended_size_gb.unwrap_or(volume.size_gb);
        let (recommended_class, recommended_iops, recommended_throughput) =
            if performance.is_overprovisioned {
                (
                    performance
                        .recommended_class
                        .clone()
                        .unwrap_or_else(|| volume.volume_type.clone()),
                    performance.recommended_iops,
                    performance.recommended_throughput,
                )
            } else {
                (volume.volume_type.clone(), volume.iops, volume.throughput)
            };

        let current_monthly_cost = self.pricing.volume_cost(volume, &self.region);
        let recommended_monthly_cost = self
            .pricing
            .estimate_monthly_cost(
                recommended_size_gb,
                &recommended_class,
                &self.region,
                recommended_iops.map(f64::from),
                recommended_throughput.map(f64::from),
            )
            .map(|e| e.monthly_cost);
        let estimated_monthly_savings = match (current_monthly_cost, recommended_monthly_cost) {
            (Some(current), Some(recommended)) if is_overprovisioned => {
                round_cents((current - recommended).max(0.0))
            }
            _ => 0.0,
        };

        let reason = format!("{} / {}", size.reason, performance.reason);
        if is_overprovisioned {
            info!(
                volume_id = %volume.volume_id,
                size = size.is_overprovisioned,
                performance = performance.is_overprovisioned,
                recommended_size_gb = recommended_size_gb,
                recommended_class = %recommended_class,
                savings = estimated_monthly_savings,
                "Overprovisioned volume detected"
            );
        }

        OverprovisionedVerdict {
            volume_id: volume.volume_id.clone(),
            instance_id: instance_id.to_string(),
            device: device.to_string(),
            is_overprovisioned,
            reason,
            size,
            performance,
            disk_usage,
            metrics,
            current_monthly_cost,
            recommended_size_gb,
            recommended_class,
            recommended_iops,
            recommended_throughput,
            recommended_monthly_cost,
            estimated_monthly_savings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backends, CloudSnapshot, SnapshotBackend};
    use crate::models::{DiskUsageSample, Platform, UsageSource};
    use crate::telemetry::{MetricName, MetricSummary};
    use crate::testing::{
        attached, daily_sums, fast_poll, filesystem, instance, set_metric,
        snapshot_with_instances, volume,
    };

    fn usage(percent: f64) -> DiskUsage {
        DiskUsage::from_samples(
            vec![DiskUsageSample {
                used_percent: percent,
                source: UsageSource::Telemetry,
                path: Some("/data".to_string()),
                timestamp: None,
            }],
            UsageSource::Telemetry,
        )
    }

    #[test]
    fn test_size_recommendation_scenario() {
        let decision = size_decision(100, &usage(10.0), &OverprovisionedCriteria::default());

        assert!(decision.is_overprovisioned);
        assert_eq!(decision.used_gb, Some(10.0));
        assert_eq!(decision.free_gb, Some(90.0));
        assert_eq!(decision.recommended_size_gb, Some(20));
    }

    #[test]
    fn test_ratio_buffer_wins_for_large_usage() {
        // 1000 GB at 15%: 150 used, buffer 45
        let decision = size_decision(1000, &usage(15.0), &OverprovisionedCriteria::default());
        assert_eq!(decision.recommended_size_gb, Some(195));
    }

    #[test]
    fn test_unavailable_usage_never_recommends() {
        let decision = size_decision(
            500,
            &DiskUsage::unavailable("no agent"),
            &OverprovisionedCriteria::default(),
        );
        assert!(!decision.is_overprovisioned);
        assert_eq!(decision.reason, "usage data unavailable");
        assert_eq!(decision.recommended_size_gb, None);
    }

    #[test]
    fn test_small_reductions_are_demoted() {
        let criteria = OverprovisionedCriteria::default();

        // 55 GB at 10% leaves 49.5 GB free
        assert!(!size_decision(55, &usage(10.0), &criteria).is_overprovisioned);

        // 64 GB at 5%: recommended 13, free 60.8 > 50, reduction 51 GB -> flagged
        assert!(size_decision(64, &usage(5.0), &criteria).is_overprovisioned);

        // Large reduction floor rejects it
        let strict = OverprovisionedCriteria {
            min_reduction_gb: 100.0,
            ..Default::default()
        };
        let decision = size_decision(100, &usage(10.0), &strict);
        assert!(!decision.is_overprovisioned);
        assert!(decision.reason.contains("saves too little"));
    }

    #[test]
    fn test_recommendation_is_at_least_one_gb() {
        let criteria = OverprovisionedCriteria {
            min_buffer_gb: 0.0,
            buffer_ratio: 0.0,
            ..Default::default()
        };
        assert_eq!(recommended_size_gb(0.0, &criteria), 1);
    }

    fn perf_metrics(ops_per_day: f64, bytes_per_day: f64) -> VolumeMetrics {
        let mut metrics = VolumeMetrics::new(86_400);
        let ops = MetricSummary::from_datapoints(&daily_sums(7, ops_per_day));
        let bytes = MetricSummary::from_datapoints(&daily_sums(7, bytes_per_day));
        if let (Some(ops), Some(bytes)) = (ops, bytes) {
            metrics.insert(MetricName::VolumeReadOps, ops);
            metrics.insert(MetricName::VolumeReadBytes, bytes);
        }
        metrics
    }

    #[test]
    fn test_gp3_performance_reduced_to_buffered_peak() {
        let mut vol = volume("vol-1", VolumeClass::Gp3, 200);
        vol.iops = Some(10_000);
        vol.throughput = Some(500);
        // 1000 IOPS and 10 MiB/s sustained
        let metrics = perf_metrics(1000.0 * 86_400.0, 10.0 * 1024.0 * 1024.0 * 86_400.0);

        let decision = performance_decision(&vol, &metrics, &OverprovisionedCriteria::default());

        assert!(decision.is_overprovisioned);
        assert_eq!(decision.iops_utilization_percent, Some(10.0));
        assert_eq!(decision.recommended_class, Some(VolumeClass::Gp3));
        assert_eq!(decision.recommended_iops, Some(GP3_MIN_IOPS));
        assert_eq!(decision.recommended_throughput, Some(GP3_MIN_THROUGHPUT));
    }

    #[test]
    fn test_io1_moves_to_gp3_when_peak_fits() {
        let mut vol = volume("vol-1", VolumeClass::Io1, 200);
        vol.iops = Some(20_000);
        let metrics = perf_metrics(4000.0 * 86_400.0, 0.0);

        let decision = performance_decision(&vol, &metrics, &OverprovisionedCriteria::default());

        assert!(decision.is_overprovisioned);
        assert_eq!(decision.recommended_class, Some(VolumeClass::Gp3));
        assert_eq!(decision.recommended_iops, Some(5200));
    }

    #[test]
    fn test_io2_stays_when_peak_exceeds_gp3() {
        let mut vol = volume("vol-1", VolumeClass::Io2, 200);
        vol.iops = Some(64_000);
        let metrics = perf_metrics(14_000.0 * 86_400.0, 0.0);

        let decision = performance_decision(&vol, &metrics, &OverprovisionedCriteria::default());

        assert!(decision.is_overprovisioned);
        assert_eq!(decision.recommended_class, Some(VolumeClass::Io2));
        assert_eq!(decision.recommended_iops, Some(18_200));
    }

    #[test]
    fn test_gp2_has_no_performance_verdict() {
        let vol = volume("vol-1", VolumeClass::Gp2, 200);
        let decision = performance_decision(&vol, &perf_metrics(1.0, 1.0), &OverprovisionedCriteria::default());
        assert!(!decision.is_overprovisioned);
        assert_eq!(decision.iops_utilization_percent, None);
    }

    fn detector(snapshot: CloudSnapshot) -> OverprovisionedDetector {
        let backend = Arc::new(SnapshotBackend::from_snapshot(snapshot));
        let backends = Backends::shared(backend);
        OverprovisionedDetector::new(
            backends.telemetry.clone(),
            AcquisitionChain::standard(&backends, fast_poll()),
            OverprovisionedCriteria::default(),
            PriceTable::default(),
            "us-east-1",
        )
    }

    #[tokio::test]
    async fn test_detect_only_attached_volumes() {
        let mut snapshot = snapshot_with_instances(vec![instance("i-1", Platform::Linux)]);
        snapshot
            .filesystems
            .insert("i-1".to_string(), vec![filesystem("/data", Some("xvdf"), 10.0)]);
        let detector = detector(snapshot);

        let volumes = vec![
            attached(volume("vol-1", VolumeClass::Gp2, 100), "i-1", "/dev/xvdf", 30),
            volume("vol-2", VolumeClass::Gp2, 100),
        ];
        let verdicts = detector
            .detect(&volumes, &MetricWindow::last_days(30, 86_400), &ReachabilityCache::new())
            .await;

        assert_eq!(verdicts.len(), 1);
        let verdict = &verdicts[0];
        assert_eq!(verdict.volume_id, "vol-1");
        assert!(verdict.is_overprovisioned);
        assert_eq!(verdict.recommended_size_gb, 20);
        assert_eq!(verdict.current_monthly_cost, Some(10.0));
        assert_eq!(verdict.recommended_monthly_cost, Some(2.0));
        assert_eq!(verdict.estimated_monthly_savings, 8.0);
        assert!(verdict.reason.starts_with("usage 10.0%"));
    }

    #[tokio::test]
    async fn test_unavailable_usage_still_checks_performance() {
        let mut snapshot = snapshot_with_instances(vec![instance("i-1", Platform::Linux)]);
        snapshot.agents.clear();
        set_metric(&mut snapshot, "vol-1", MetricName::VolumeReadOps, daily_sums(30, 86_400.0));
        let detector = detector(snapshot);

        let mut vol = attached(volume("vol-1", VolumeClass::Gp3, 100), "i-1", "/dev/xvdf", 30);
        vol.iops = Some(6000);
        vol.throughput = Some(125);

        let verdict = detector
            .evaluate(&vol, &MetricWindow::last_days(30, 86_400), &ReachabilityCache::new())
            .await
            .unwrap();

        assert!(matches!(verdict.disk_usage, DiskUsage::Unavailable { .. }));
        assert!(!verdict.size.is_overprovisioned);
        assert!(verdict.performance.is_overprovisioned);
        assert_eq!(verdict.recommended_size_gb, 100);
        assert_eq!(verdict.recommended_iops, Some(GP3_MIN_IOPS));
        // 3000 provisioned IOPS above the free tier at 0.005
        assert_eq!(verdict.estimated_monthly_savings, 15.0);
    }
}
