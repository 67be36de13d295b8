//! Metric series, windows and summaries
//!
//! Datapoints are per-period aggregates. Rates are derived by dividing the
//! per-period sum by the period length, which is always passed explicitly.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Telemetry signals the engine consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MetricName {
    VolumeIdleTime,
    VolumeReadOps,
    VolumeWriteOps,
    VolumeReadBytes,
    VolumeWriteBytes,
    BurstBalance,
    VolumeTotalReadTime,
    VolumeTotalWriteTime,
    VolumeQueueLength,
    /// Filesystem filled percentage reported by the host agent
    DiskUsedPercent,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::VolumeIdleTime => "VolumeIdleTime",
            MetricName::VolumeReadOps => "VolumeReadOps",
            MetricName::VolumeWriteOps => "VolumeWriteOps",
            MetricName::VolumeReadBytes => "VolumeReadBytes",
            MetricName::VolumeWriteBytes => "VolumeWriteBytes",
            MetricName::BurstBalance => "BurstBalance",
            MetricName::VolumeTotalReadTime => "VolumeTotalReadTime",
            MetricName::VolumeTotalWriteTime => "VolumeTotalWriteTime",
            MetricName::VolumeQueueLength => "VolumeQueueLength",
            MetricName::DiskUsedPercent => "disk_used_percent",
        }
    }

    /// Series collected for every volume
    pub const VOLUME_SIGNALS: [MetricName; 8] = [
        MetricName::VolumeIdleTime,
        MetricName::VolumeReadOps,
        MetricName::VolumeWriteOps,
        MetricName::VolumeReadBytes,
        MetricName::VolumeWriteBytes,
        MetricName::VolumeTotalReadTime,
        MetricName::VolumeTotalWriteTime,
        MetricName::VolumeQueueLength,
    ];
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One per-period aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datapoint {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub average: f64,
    #[serde(default)]
    pub maximum: f64,
    #[serde(default)]
    pub minimum: f64,
    #[serde(default)]
    pub sum: f64,
    #[serde(default)]
    pub sample_count: f64,
}

/// Lookback window and aggregation period
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub period_secs: u64,
}

impl MetricWindow {
    /// Window ending now covering the last `days`
    pub fn last_days(days: u32, period_secs: u64) -> Self {
        let end = Utc::now();
        Self {
            start: end - Duration::days(i64::from(days)),
            end,
            period_secs,
        }
    }
}

/// What a metric query is scoped to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricTarget {
    Volume { volume_id: String },
    Filesystem { instance_id: String, path: String },
}

/// Reduction of a datapoint series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    /// Mean of per-period averages
    pub average: f64,
    pub maximum: f64,
    pub minimum: f64,
    /// Mean of per-period sums
    pub mean_sum: f64,
    /// Largest per-period sum
    pub peak_sum: f64,
    pub total_sum: f64,
    /// Average of the most recent datapoint
    pub latest: f64,
    pub datapoints: usize,
}

impl MetricSummary {
    /// Summarize a series; `None` when there are no datapoints
    pub fn from_datapoints(points: &[Datapoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }

        let n = points.len() as f64;
        let total_sum: f64 = points.iter().map(|p| p.sum).sum();
        let latest = points
            .iter()
            .max_by_key(|p| p.timestamp)
            .map(|p| p.average)
            .unwrap_or_default();

        Some(Self {
            average: points.iter().map(|p| p.average).sum::<f64>() / n,
            maximum: points.iter().map(|p| p.maximum).fold(f64::MIN, f64::max),
            minimum: points.iter().map(|p| p.minimum).fold(f64::MAX, f64::min),
            mean_sum: total_sum / n,
            peak_sum: points.iter().map(|p| p.sum).fold(f64::MIN, f64::max),
            total_sum,
            latest,
            datapoints: points.len(),
        })
    }
}

/// Summaries for one volume keyed by signal
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeMetrics {
    pub period_secs: u64,
    pub series: BTreeMap<MetricName, MetricSummary>,
}

const MIB: f64 = 1024.0 * 1024.0;

impl VolumeMetrics {
    pub fn new(period_secs: u64) -> Self {
        Self {
            period_secs,
            series: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn get(&self, name: MetricName) -> Option<&MetricSummary> {
        self.series.get(&name)
    }

    pub fn insert(&mut self, name: MetricName, summary: MetricSummary) {
        self.series.insert(name, summary);
    }

    fn period(&self) -> f64 {
        self.period_secs.max(1) as f64
    }

    /// Share of each period the volume spent idle, 0-100
    pub fn idle_time_percent(&self) -> Option<f64> {
        self.get(MetricName::VolumeIdleTime)
            .map(|s| (s.mean_sum / self.period() * 100.0).clamp(0.0, 100.0))
    }

    fn combined_sum(&self, a: MetricName, b: MetricName, pick: fn(&MetricSummary) -> f64) -> Option<f64> {
        match (self.get(a), self.get(b)) {
            (None, None) => None,
            (x, y) => Some(x.map(pick).unwrap_or(0.0) + y.map(pick).unwrap_or(0.0)),
        }
    }

    /// Mean read+write operations per period
    pub fn ops_per_period(&self) -> Option<f64> {
        self.combined_sum(MetricName::VolumeReadOps, MetricName::VolumeWriteOps, |s| s.mean_sum)
    }

    /// Mean read+write bytes per period
    pub fn bytes_per_period(&self) -> Option<f64> {
        self.combined_sum(MetricName::VolumeReadBytes, MetricName::VolumeWriteBytes, |s| s.mean_sum)
    }

    /// Average read+write operations per second
    pub fn average_iops(&self) -> Option<f64> {
        self.ops_per_period().map(|ops| ops / self.period())
    }

    /// Busiest period's read+write operations per second
    pub fn peak_iops(&self) -> Option<f64> {
        self.combined_sum(MetricName::VolumeReadOps, MetricName::VolumeWriteOps, |s| s.peak_sum)
            .map(|ops| ops / self.period())
    }

    /// Average read+write throughput in MiB/s
    pub fn average_throughput_mibps(&self) -> Option<f64> {
        self.bytes_per_period().map(|bytes| bytes / self.period() / MIB)
    }

    /// Busiest period's read+write throughput in MiB/s
    pub fn peak_throughput_mibps(&self) -> Option<f64> {
        self.combined_sum(MetricName::VolumeReadBytes, MetricName::VolumeWriteBytes, |s| s.peak_sum)
            .map(|bytes| bytes / self.period() / MIB)
    }

    pub fn burst_balance_percent(&self) -> Option<f64> {
        self.get(MetricName::BurstBalance).map(|s| s.average)
    }

    /// Flattened averages for reports
    pub fn report_values(&self) -> BTreeMap<String, f64> {
        let mut values: BTreeMap<String, f64> = self
            .series
            .iter()
            .map(|(name, summary)| (name.as_str().to_string(), summary.average))
            .collect();
        if let Some(pct) = self.idle_time_percent() {
            values.insert("VolumeIdleTime_percent".to_string(), (pct * 100.0).round() / 100.0);
        }
        if let Some(iops) = self.average_iops() {
            values.insert("TotalIOPS".to_string(), iops);
        }
        if let Some(tp) = self.average_throughput_mibps() {
            values.insert("TotalThroughputMiBps".to_string(), tp);
        }
        values
    }
}
