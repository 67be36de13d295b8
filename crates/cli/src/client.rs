//! API client for communicating with the volume optimizer service

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// API client for the volume optimizer service
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            anyhow::bail!("API error ({}): {}", status, message);
        }

        response.json().await.context("Failed to parse response")
    }

    pub async fn analyze(&self, volume_ids: Vec<String>) -> Result<AnalysisReport> {
        self.post("v1/analyze", &AnalyzeRequest { volume_ids }).await
    }

    pub async fn execute(&self, volume_id: &str, action: Action) -> Result<ExecutionResult> {
        let request = ExecuteRequest {
            volume_id: volume_id.to_string(),
            action,
        };
        self.post("v1/execute", &request).await
    }

    pub async fn estimate_cost(&self, request: &CostRequest) -> Result<CostEstimate> {
        self.post("v1/costs/estimate", request).await
    }
}

// API request and response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    pub volume_ids: Vec<String>,
}

/// Remediation as sent to the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    SnapshotOnly,
    SnapshotAndDelete,
    ChangeType {
        #[serde(skip_serializing_if = "Option::is_none")]
        target_class: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        iops: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        throughput: Option<u32>,
    },
    Resize {
        target_size_gb: u64,
    },
    ChangeTypeAndResize {
        #[serde(skip_serializing_if = "Option::is_none")]
        target_class: Option<String>,
        target_size_gb: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        iops: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        throughput: Option<u32>,
    },
}

impl Action {
    /// Short label for tables
    pub fn label(&self) -> &'static str {
        match self {
            Action::SnapshotOnly => "snapshot",
            Action::SnapshotAndDelete => "snapshot + delete",
            Action::ChangeType { .. } => "change type",
            Action::Resize { .. } => "resize",
            Action::ChangeTypeAndResize { .. } => "change type + resize",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub volume_id: String,
    pub action: Action,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostRequest {
    pub size_gb: u64,
    pub volume_class: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iops: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throughput: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub total_volumes: usize,
    pub idle_count: usize,
    pub overprovisioned_count: usize,
    #[serde(default)]
    pub error_count: usize,
    pub estimated_monthly_savings: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeRecommendation {
    pub volume_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub volume_type: String,
    pub size_gb: u64,
    pub classification: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_monthly_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommended_size_gb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommended_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommended_monthly_cost: Option<f64>,
    pub estimated_monthly_savings: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub region: String,
    pub generated_at: String,
    pub summary: AnalysisSummary,
    pub results: Vec<VolumeRecommendation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub volume_id: String,
    pub action_type: String,
    pub success: bool,
    pub status: String,
    #[serde(default)]
    pub details: BTreeMap<String, serde_json::Value>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEstimate {
    pub monthly_cost: f64,
    pub storage_cost: f64,
    pub iops_cost: f64,
    pub throughput_cost: f64,
    pub priced_region: String,
    pub priced_class: String,
    #[serde(default)]
    pub degraded: bool,
    #[serde(default)]
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
