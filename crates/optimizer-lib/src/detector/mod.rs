//! Volume classification
//!
//! This module provides two detectors that run over the same inventory:
//! - [`IdleDetector`]: volumes doing no useful work
//! - [`OverprovisionedDetector`]: volumes sized or provisioned well beyond need
//!
//! Both fetch per-volume block telemetry through [`collect_volume_metrics`].
//! A missing series is never fatal; it narrows what can be concluded.

pub mod idle;
pub mod overprovisioned;

pub use idle::{IdleDetector, IdleVerdict};
pub use overprovisioned::{
    OverprovisionedDetector, OverprovisionedVerdict, PerformanceDecision, SizeDecision,
};

use crate::backend::TelemetryService;
use crate::models::Volume;
use crate::telemetry::{MetricName, MetricSummary, MetricTarget, MetricWindow, VolumeMetrics};
use tracing::{debug, warn};

/// Signals queried for `volume`
///
/// Burst balance is only reported by burst-credit classes.
pub fn signals_for(volume: &Volume) -> Vec<MetricName> {
    let mut signals = MetricName::VOLUME_SIGNALS.to_vec();
    if volume.volume_type.has_burst_balance() {
        signals.push(MetricName::BurstBalance);
    }
    signals
}

/// Query and summarize every block signal of a volume
///
/// A failed query is logged and leaves that signal absent.
pub async fn collect_volume_metrics(
    telemetry: &dyn TelemetryService,
    volume: &Volume,
    window: &MetricWindow,
) -> VolumeMetrics {
    let target = MetricTarget::Volume {
        volume_id: volume.volume_id.clone(),
    };
    let mut metrics = VolumeMetrics::new(window.period_secs);

    for signal in signals_for(volume) {
        match telemetry.query_metric(&target, signal, window).await {
            Ok(points) => {
                if let Some(summary) = MetricSummary::from_datapoints(&points) {
                    metrics.insert(signal, summary);
                }
            }
            Err(e) => {
                warn!(
                    volume_id = %volume.volume_id,
                    metric = %signal,
                    error = %e,
                    "Metric query failed, treating series as absent"
                );
            }
        }
    }

    debug!(
        volume_id = %volume.volume_id,
        series = metrics.series.len(),
        "Collected volume metrics"
    );
    metrics
}
