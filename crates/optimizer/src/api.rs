//! HTTP API for analysis, remediation, cost estimates, health checks and
//! Prometheus metrics

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use optimizer_lib::{
    health::{ComponentStatus, HealthRegistry},
    Engine, EngineError, RemediationAction, VolumeClass,
};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub health_registry: HealthRegistry,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, health_registry: HealthRegistry) -> Self {
        Self {
            engine,
            health_registry,
        }
    }
}

/// Error body returned by the `/v1` routes
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::UnknownVolumes(_) => Self {
                status: StatusCode::NOT_FOUND,
                message: err.to_string(),
            },
            other => {
                error!(error = %other, "Analysis failed");
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: "analysis failed, see service logs".to_string(),
                }
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub volume_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub volume_id: String,
    pub action: RemediationAction,
}

#[derive(Debug, Deserialize)]
pub struct CostRequest {
    pub size_gb: u64,
    pub volume_class: VolumeClass,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub iops: Option<f64>,
    #[serde(default)]
    pub throughput: Option<f64>,
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

async fn analyze(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;
    let report = state.engine.analyze(&request.volume_ids).await?;
    Ok(Json(report).into_response())
}

async fn execute(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ExecuteRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;
    if request.volume_id.trim().is_empty() {
        return Err(ApiError::bad_request("volume_id must not be empty"));
    }

    info!(
        volume_id = %request.volume_id,
        action = %request.action.action_type(),
        "Execution requested"
    );
    let result = state
        .engine
        .execute(&request.volume_id, &request.action)
        .await;
    Ok(Json(result).into_response())
}

async fn estimate_cost(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CostRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;

    match state.engine.estimate_cost(
        request.size_gb,
        &request.volume_class,
        request.region.as_deref(),
        request.iops,
        request.throughput,
    ) {
        Some(estimate) => Ok(Json(estimate).into_response()),
        None => {
            warn!(class = %request.volume_class, "No price available");
            Err(ApiError {
                status: StatusCode::NOT_FOUND,
                message: format!("no price available for {}", request.volume_class),
            })
        }
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/v1/analyze", post(analyze))
        .route("/v1/execute", post(execute))
        .route("/v1/costs/estimate", post(estimate_cost))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
