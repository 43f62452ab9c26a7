//! HTTP handlers for the module host
//!
//! Operational endpoints:
//! - POST /process                - run the request pipeline
//! - POST /process/response       - run the response pipeline
//! - GET  /health                 - aggregate health (503 unless healthy)
//! - GET  /ready                  - readiness probe
//! - GET  /modules                - registered modules
//! - GET  /modules/:name          - one module
//! - POST /modules/:name/reload   - reload with the posted or current config
//! - GET  /metrics                - OpenMetrics exposition
//!
//! Proxy contract mirror under `/ext/v1`.

use super::server::{HostStatus, ModuleHost};
use crate::adapter::{ProxyHealthStatus, ProxyRequest, ProxyResponse};
use crate::error::Error;
use crate::module::{ModuleConfig, ModuleType};
use crate::registry::RegistryHealth;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const OPENMETRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Create the host router
pub fn host_router(host: Arc<ModuleHost>) -> Router {
    Router::new()
        .route("/process", post(process_request))
        .route("/process/response", post(process_response))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/modules", get(list_modules))
        .route("/modules/:name", get(get_module))
        .route("/modules/:name/reload", post(reload_module))
        .route("/metrics", get(metrics))
        .route("/ext/v1/request", post(process_request))
        .route("/ext/v1/response", post(process_response))
        .route("/ext/v1/health", get(ext_health))
        .with_state(host)
}

// =============================================================================
// Error body
// =============================================================================

/// API error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

/// API error detail
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
            },
        }
    }
}

/// Crate error rendered as an HTTP response
struct HttpError(Error);

impl From<Error> for HttpError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = match self.0.code() {
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "CONFIG_ERROR" | "INVALID_INPUT" => StatusCode::BAD_REQUEST,
            "DEPENDENCY_ERROR" | "ALREADY_REGISTERED" => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        (status, Json(ApiError::new(self.0.code(), self.0.to_string()))).into_response()
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// POST /process
async fn process_request(
    State(host): State<Arc<ModuleHost>>,
    Json(request): Json<ProxyRequest>,
) -> impl IntoResponse {
    let cancel = host.request_token();
    Json(host.adapter().process_request(request, &cancel).await)
}

/// POST /process/response
async fn process_response(
    State(host): State<Arc<ModuleHost>>,
    Json(response): Json<ProxyResponse>,
) -> impl IntoResponse {
    let cancel = host.request_token();
    Json(host.adapter().process_response(response, &cancel).await)
}

// =============================================================================
// Health
// =============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    host: HostStatus,
    pipeline: RegistryHealth,
}

/// GET /health
async fn health(State(host): State<Arc<ModuleHost>>) -> impl IntoResponse {
    let report = host.registry().health_check().await;
    let (code, status) = if report.is_healthy() {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };
    (
        code,
        Json(HealthResponse {
            status,
            host: host.status().await,
            pipeline: report,
        }),
    )
}

/// GET /ready
async fn ready() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ready",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /ext/v1/health
async fn ext_health(State(host): State<Arc<ModuleHost>>) -> impl IntoResponse {
    let health = host.adapter().health().await;
    let code = match health.status {
        ProxyHealthStatus::Healthy => StatusCode::OK,
        ProxyHealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(health))
}

// =============================================================================
// Modules
// =============================================================================

/// GET /modules
async fn list_modules(State(host): State<Arc<ModuleHost>>) -> impl IntoResponse {
    Json(host.registry().snapshots().await)
}

/// GET /modules/:name
async fn get_module(
    State(host): State<Arc<ModuleHost>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, HttpError> {
    Ok(Json(host.registry().snapshot(&name).await?))
}

/// Body of `POST /modules/:name/reload`: a full module record, or the
/// record without `name`/`type` (taken from the registered module)
#[derive(Debug, Deserialize)]
struct ReloadRequest {
    name: Option<String>,
    #[serde(rename = "type")]
    module_type: Option<ModuleType>,
    #[serde(flatten)]
    rest: serde_json::Map<String, serde_json::Value>,
}

/// POST /modules/:name/reload
async fn reload_module(
    State(host): State<Arc<ModuleHost>>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, HttpError> {
    let registry = host.registry();
    if body.iter().all(u8::is_ascii_whitespace) {
        registry.reload_current(&name).await?;
    } else {
        let current = registry.snapshot(&name).await?;
        let request: ReloadRequest = serde_json::from_slice(&body).map_err(Error::from)?;
        let mut record = request.rest;
        record.insert(
            "name".to_string(),
            serde_json::Value::String(request.name.unwrap_or_else(|| name.clone())),
        );
        record.insert(
            "type".to_string(),
            crate::error::to_json(request.module_type.unwrap_or(current.info.module_type)),
        );
        let config: ModuleConfig =
            serde_json::from_value(serde_json::Value::Object(record)).map_err(Error::from)?;
        registry.reload(&name, config).await?;
    }
    Ok(Json(registry.snapshot(&name).await?))
}

// =============================================================================
// Metrics
// =============================================================================

/// GET /metrics
async fn metrics(State(host): State<Arc<ModuleHost>>) -> Result<impl IntoResponse, HttpError> {
    let body = host.render_metrics().await?;
    Ok(([(header::CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)], body))
}
