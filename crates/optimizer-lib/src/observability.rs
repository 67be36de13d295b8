//! Observability infrastructure for the volume optimizer
//!
//! Provides:
//! - Prometheus metrics (analysis latency, detections, remote command timeouts, executions)
//! - Structured audit events with tracing

use crate::models::{AnalysisSummary, ExecutionResult, ExecutionStatus};
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Histogram, IntCounter,
    IntCounterVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for a full analysis pass (in seconds)
const ANALYSIS_BUCKETS: &[f64] = &[
    0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<OptimizerMetricsInner> = OnceLock::new();

struct OptimizerMetricsInner {
    analysis_latency_seconds: Histogram,
    volumes_analyzed: IntCounter,
    idle_detected: IntCounter,
    overprovisioned_detected: IntCounter,
    analysis_errors: IntCounter,
    usage_unavailable: IntCounter,
    command_timeouts: IntCounter,
    executions: IntCounterVec,
}

impl OptimizerMetricsInner {
    fn new() -> Self {
        Self {
            analysis_latency_seconds: register_histogram!(
                "volume_optimizer_analysis_latency_seconds",
                "Time spent on one analysis pass",
                ANALYSIS_BUCKETS.to_vec()
            )
            .expect("Failed to register analysis_latency_seconds"),

            volumes_analyzed: register_int_counter!(
                "volume_optimizer_volumes_analyzed_total",
                "Total number of volumes analyzed"
            )
            .expect("Failed to register volumes_analyzed"),

            idle_detected: register_int_counter!(
                "volume_optimizer_idle_detected_total",
                "Total number of volumes classified idle"
            )
            .expect("Failed to register idle_detected"),

            overprovisioned_detected: register_int_counter!(
                "volume_optimizer_overprovisioned_detected_total",
                "Total number of volumes classified overprovisioned"
            )
            .expect("Failed to register overprovisioned_detected"),

            analysis_errors: register_int_counter!(
                "volume_optimizer_analysis_errors_total",
                "Total number of volumes whose analysis failed"
            )
            .expect("Failed to register analysis_errors"),

            usage_unavailable: register_int_counter!(
                "volume_optimizer_usage_unavailable_total",
                "Total number of disk usage lookups that found no data"
            )
            .expect("Failed to register usage_unavailable"),

            command_timeouts: register_int_counter!(
                "volume_optimizer_remote_command_timeouts_total",
                "Total number of remote commands that did not finish in time"
            )
            .expect("Failed to register command_timeouts"),

            executions: register_int_counter_vec!(
                "volume_optimizer_executions_total",
                "Remediation attempts by action and terminal status",
                &["action", "status"]
            )
            .expect("Failed to register executions"),
        }
    }
}

/// Optimizer metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share it.
#[derive(Clone)]
pub struct OptimizerMetrics {
    _private: (),
}

impl Default for OptimizerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimizerMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(OptimizerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &OptimizerMetricsInner {
        GLOBAL_METRICS.get_or_init(OptimizerMetricsInner::new)
    }

    pub fn observe_analysis_latency(&self, duration_secs: f64) {
        self.inner().analysis_latency_seconds.observe(duration_secs);
    }

    /// Record the counts of one finished analysis pass
    pub fn record_summary(&self, summary: &AnalysisSummary) {
        let inner = self.inner();
        inner.volumes_analyzed.inc_by(summary.total_volumes as u64);
        inner.idle_detected.inc_by(summary.idle_count as u64);
        inner
            .overprovisioned_detected
            .inc_by(summary.overprovisioned_count as u64);
        inner.analysis_errors.inc_by(summary.error_count as u64);
    }

    pub fn inc_usage_unavailable(&self) {
        self.inner().usage_unavailable.inc();
    }

    pub fn inc_command_timeouts(&self) {
        self.inner().command_timeouts.inc();
    }

    pub fn inc_execution(&self, action: &str, status: ExecutionStatus) {
        self.inner()
            .executions
            .with_label_values(&[action, status.as_str()])
            .inc();
    }
}

/// Structured logger for optimizer events
///
/// Every decision that can lead to a destructive change goes through here so
/// the log carries a consistent audit trail.
#[derive(Clone)]
pub struct AuditLogger {
    region: String,
}

impl AuditLogger {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
        }
    }

    /// Log the outcome of an analysis pass
    pub fn log_analysis(&self, summary: &AnalysisSummary, duration_secs: f64) {
        info!(
            event = "analysis_completed",
            region = %self.region,
            total_volumes = summary.total_volumes,
            idle = summary.idle_count,
            overprovisioned = summary.overprovisioned_count,
            errors = summary.error_count,
            estimated_monthly_savings = summary.estimated_monthly_savings,
            duration_secs = duration_secs,
            "Volume analysis completed"
        );
    }

    /// Log the outcome of a remediation attempt
    pub fn log_execution(&self, result: &ExecutionResult) {
        let details = serde_json::to_string(&result.details).unwrap_or_default();
        if result.success {
            info!(
                event = "remediation_executed",
                region = %self.region,
                volume_id = %result.volume_id,
                action = %result.action_type,
                status = result.status.as_str(),
                details = %details,
                "Remediation finished"
            );
        } else {
            warn!(
                event = "remediation_executed",
                region = %self.region,
                volume_id = %result.volume_id,
                action = %result.action_type,
                status = result.status.as_str(),
                details = %details,
                "Remediation did not complete"
            );
        }
    }

    pub fn log_startup(&self, version: &str, backend: &str) {
        info!(
            event = "optimizer_started",
            region = %self.region,
            optimizer_version = %version,
            backend = %backend,
            "Volume optimizer started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "optimizer_shutdown",
            region = %self.region,
            reason = %reason,
            "Volume optimizer shutting down"
        );
    }
}
