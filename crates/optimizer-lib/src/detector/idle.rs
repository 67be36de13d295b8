//! Idle volume detection

use super::collect_volume_metrics;
use crate::backend::TelemetryService;
use crate::config::IdleCriteria;
use crate::models::{Volume, VolumeState};
use crate::pricing::PriceTable;
use crate::telemetry::{MetricWindow, VolumeMetrics};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of idle detection for one volume
#[derive(Debug, Clone, Serialize)]
pub struct IdleVerdict {
    pub volume_id: String,
    pub is_idle: bool,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_time_percent: Option<f64>,
    pub metrics: VolumeMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_monthly_cost: Option<f64>,
    /// Whole current cost when idle, zero otherwise
    pub estimated_monthly_savings: f64,
}

/// Classify a volume from its state and block telemetry
///
/// Rules are evaluated in order and the first conclusive one wins.
pub fn classify(
    volume: &Volume,
    metrics: &VolumeMetrics,
    criteria: &IdleCriteria,
    now: DateTime<Utc>,
) -> (bool, String) {
    if volume.state == VolumeState::Available {
        return (true, "unattached".to_string());
    }

    if volume.state == VolumeState::InUse && metrics.is_empty() {
        let grace = Duration::hours(criteria.recent_attach_grace_hours);
        let recent = volume
            .latest_attach_time()
            .map(|t| now - t < grace)
            .unwrap_or(false);
        return if recent {
            (
                false,
                format!(
                    "attached within the last {}h, insufficient history",
                    criteria.recent_attach_grace_hours
                ),
            )
        } else {
            (false, "telemetry missing, needs investigation".to_string())
        };
    }

    let mut reasons = Vec::new();

    if let Some(idle_pct) = metrics.idle_time_percent() {
        if idle_pct < criteria.idle_time_threshold_percent {
            return (
                false,
                format!(
                    "idle time {:.2}% below threshold {}%",
                    idle_pct, criteria.idle_time_threshold_percent
                ),
            );
        }
        reasons.push(format!(
            "idle time {:.2}% at or above threshold {}%",
            idle_pct, criteria.idle_time_threshold_percent
        ));
    }

    if criteria.evaluate_io_signals {
        if let Some(ops) = metrics.ops_per_period() {
            if ops >= criteria.io_ops_threshold {
                return (false, format!("average {:.1} IO operations per period", ops));
            }
            reasons.push(format!("low IO operations ({:.1} per period)", ops));
        }
        if let Some(bytes) = metrics.bytes_per_period() {
            if bytes >= criteria.throughput_threshold_bytes {
                return (false, format!("average {:.0} bytes transferred per period", bytes));
            }
            reasons.push(format!("low throughput ({:.0} bytes per period)", bytes));
        }
        if let Some(balance) = metrics.burst_balance_percent() {
            if balance < criteria.burst_balance_threshold_percent {
                return (false, format!("burst balance drawn down to {:.1}%", balance));
            }
            reasons.push(format!("burst balance untouched ({:.1}%)", balance));
        }
    }

    if reasons.is_empty() {
        return (false, "idle criteria not met".to_string());
    }
    (true, reasons.join(" / "))
}

/// Classifies volumes as idle from block telemetry
pub struct IdleDetector {
    telemetry: Arc<dyn TelemetryService>,
    criteria: IdleCriteria,
    pricing: PriceTable,
    region: String,
}

impl IdleDetector {
    pub fn new(
        telemetry: Arc<dyn TelemetryService>,
        criteria: IdleCriteria,
        pricing: PriceTable,
        region: impl Into<String>,
    ) -> Self {
        Self {
            telemetry,
            criteria,
            pricing,
            region: region.into(),
        }
    }

    pub fn criteria(&self) -> &IdleCriteria {
        &self.criteria
    }

    /// Verdict for every volume, in input order
    pub async fn detect(&self, volumes: &[Volume], window: &MetricWindow) -> Vec<IdleVerdict> {
        let mut verdicts = Vec::with_capacity(volumes.len());
        for volume in volumes {
            verdicts.push(self.evaluate(volume, window).await);
        }
        verdicts
    }

    pub async fn evaluate(&self, volume: &Volume, window: &MetricWindow) -> IdleVerdict {
        // Unattached volumes are idle whatever their telemetry says.
        let metrics = if volume.state == VolumeState::Available {
            VolumeMetrics::new(window.period_secs)
        } else {
            collect_volume_metrics(self.telemetry.as_ref(), volume, window).await
        };

        let (is_idle, reason) = classify(volume, &metrics, &self.criteria, Utc::now());
        let current_monthly_cost = self.pricing.volume_cost(volume, &self.region);
        let estimated_monthly_savings = if is_idle {
            current_monthly_cost.unwrap_or(0.0)
        } else {
            0.0
        };

        if is_idle {
            info!(
                volume_id = %volume.volume_id,
                reason = %reason,
                savings = estimated_monthly_savings,
                "Idle volume detected"
            );
        } else {
            debug!(volume_id = %volume.volume_id, reason = %reason, "Volume not idle");
        }

        IdleVerdict {
            volume_id: volume.volume_id.clone(),
            is_idle,
            reason,
            idle_time_percent: metrics.idle_time_percent(),
            metrics,
            current_monthly_cost,
            estimated_monthly_savings,
        }
    }
}
