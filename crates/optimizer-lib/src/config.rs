//! Detection criteria and engine settings
//!
//! Every field has a default so partial configuration (environment variables,
//! JSON request bodies) deserializes cleanly.

use crate::pricing::PriceTable;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Criteria for idle volume detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdleCriteria {
    /// Lookback window in days (default: 7)
    pub days_to_check: u32,
    /// Idle-time percentage at or above which a volume counts as idle (default: 95)
    pub idle_time_threshold_percent: f64,
    /// Also require low IO ops, low throughput and high burst balance
    pub evaluate_io_signals: bool,
    /// Per-period average read+write operations considered low (default: 10)
    pub io_ops_threshold: f64,
    /// Per-period average read+write bytes considered low (default: 5 MiB)
    pub throughput_threshold_bytes: f64,
    /// Burst balance percentage considered untouched (default: 90)
    pub burst_balance_threshold_percent: f64,
    /// Attachments younger than this are given the benefit of the doubt (default: 24)
    pub recent_attach_grace_hours: i64,
}

impl Default for IdleCriteria {
    fn default() -> Self {
        Self {
            days_to_check: 7,
            idle_time_threshold_percent: 95.0,
            evaluate_io_signals: false,
            io_ops_threshold: 10.0,
            throughput_threshold_bytes: 5.0 * 1024.0 * 1024.0,
            burst_balance_threshold_percent: 90.0,
            recent_attach_grace_hours: 24,
        }
    }
}

/// Criteria for size and performance overprovisioning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverprovisionedCriteria {
    /// Lookback window in days (default: 30)
    pub days_to_check: u32,
    /// Filled percentage below which a volume may be oversized (default: 20)
    pub low_usage_threshold_percent: f64,
    /// Free space that must remain above this to flag a volume (default: 50)
    pub min_free_space_gb: f64,
    /// Safety margin above used space when sizing down (default: 0.3)
    pub buffer_ratio: f64,
    /// Lower bound on the safety margin (default: 10)
    pub min_buffer_gb: f64,
    /// Smallest shrink worth proposing, absolute (default: 5)
    pub min_reduction_gb: f64,
    /// Smallest shrink worth proposing, relative to current size (default: 10)
    pub min_reduction_percent: f64,
    /// IOPS utilization below this flags performance overprovisioning (default: 50)
    pub iops_usage_threshold_percent: f64,
    /// Throughput utilization below this flags performance overprovisioning (default: 50)
    pub throughput_usage_threshold_percent: f64,
}

impl Default for OverprovisionedCriteria {
    fn default() -> Self {
        Self {
            days_to_check: 30,
            low_usage_threshold_percent: 20.0,
            min_free_space_gb: 50.0,
            buffer_ratio: 0.3,
            min_buffer_gb: 10.0,
            min_reduction_gb: 5.0,
            min_reduction_percent: 10.0,
            iops_usage_threshold_percent: 50.0,
            throughput_usage_threshold_percent: 50.0,
        }
    }
}

/// Polling behaviour for remote commands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    /// Delay between status checks (default: 5000)
    pub poll_interval_ms: u64,
    /// Status checks before giving up (default: 6)
    pub max_attempts: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5000,
            max_attempts: 6,
        }
    }
}

impl PollSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Region used for price lookups and reports
    pub region: String,
    /// Metric aggregation period in seconds (default: 86400)
    pub metric_period_secs: u64,
    pub idle: IdleCriteria,
    pub overprovisioned: OverprovisionedCriteria,
    pub remote_command: PollSettings,
    /// Volumes analyzed concurrently (default: 8)
    pub max_concurrency: usize,
    /// Replaces the built-in price table when set
    pub pricing: Option<PriceTable>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            metric_period_secs: 86_400,
            idle: IdleCriteria::default(),
            overprovisioned: OverprovisionedCriteria::default(),
            remote_command: PollSettings::default(),
            max_concurrency: 8,
            pricing: None,
        }
    }
}

impl EngineConfig {
    /// Price table in effect
    pub fn price_table(&self) -> PriceTable {
        self.pricing.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: EngineConfig = serde_json::from_str(
            r#"{"region":"ap-northeast-2","idle":{"evaluate_io_signals":true}}"#,
        )
        .unwrap();

        assert_eq!(config.region, "ap-northeast-2");
        assert!(config.idle.evaluate_io_signals);
        assert_eq!(config.idle.idle_time_threshold_percent, 95.0);
        assert_eq!(config.overprovisioned.min_buffer_gb, 10.0);
        assert_eq!(config.remote_command.max_attempts, 6);
        assert_eq!(config.metric_period_secs, 86_400);
    }

    #[test]
    fn test_poll_interval() {
        let poll = PollSettings {
            poll_interval_ms: 250,
            max_attempts: 2,
        };
        assert_eq!(poll.interval(), Duration::from_millis(250));
    }
}
