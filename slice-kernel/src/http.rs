/**
 * CONTROL API - HTTP surface of the slice kernel
 *
 * ROLE:
 * Request/response front of the engine for the CLI, dashboards and scripts.
 *
 * ROUTES:
 * - POST /slice/{name}/activate    -> ActivationReport
 * - POST /slice/{name}/deactivate  -> DeactivationReport
 * - GET  /slices/status            -> StatusSnapshot
 * - GET  /slices                   -> catalog
 * - GET  /topology                 -> switches, links, hosts
 * - GET  /health, /system/health
 *
 * SECURITY:
 * When an API key is configured, every route except /health requires the
 * x-api-key header.
 *
 * ERRORS:
 * {status: "error", error: <kind>, message} with the status code of the
 * underlying SliceError (404 / 409 / 502 / 503 / 500).
 */

use crate::engine::EngineHandle;
use crate::error::SliceError;
use crate::health::{HealthTracker, KernelHealth};
use crate::lifecycle::{ActivationReport, StatusSnapshot, TopologyView};
use crate::models::SliceDefinition;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub health_tracker: HealthTracker,
    pub api_key: Option<Arc<str>>,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/slice/{name}/activate", post(activate))
        .route("/slice/{name}/deactivate", post(deactivate))
        .route("/slices/status", get(get_status))
        .route("/slices", get(list_slices))
        .route("/topology", get(get_topology))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_api_key))
        .with_state(app_state)
}

async fn require_api_key(State(app): State<AppState>, req: Request, next: Next) -> Result<Response, StatusCode> {
    let Some(expected) = app.api_key.as_deref() else {
        return Ok(next.run(req).await);
    };
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected);
    if !ok {
        warn!("[http] rejected {} {}: missing or wrong x-api-key", req.method(), req.uri().path());
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub struct ApiError(pub SliceError);

#[derive(Serialize)]
struct ErrorBody {
    status: &'static str,
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody { status: "error", error: self.0.kind(), message: self.0.to_string() };
        (self.0.status_code(), Json(body)).into_response()
    }
}

impl From<SliceError> for ApiError {
    fn from(e: SliceError) -> Self {
        Self(e)
    }
}

#[derive(Serialize)]
struct ActivateBody {
    status: &'static str,
    message: String,
    #[serde(flatten)]
    report: ActivationReport,
}

#[derive(Serialize)]
struct DeactivateBody {
    status: &'static str,
    message: String,
    warnings: Vec<String>,
}

// POST /slice/{name}/activate
async fn activate(State(app): State<AppState>, Path(name): Path<String>) -> Result<Json<ActivateBody>, ApiError> {
    let report = app.engine.activate(&name).await?;
    let mut message = format!("Slice '{}' activated successfully.", name);
    if !report.preempted_slices.is_empty() {
        message.push_str(&format!(" Preempted: {}.", report.preempted_slices.join(", ")));
    }
    Ok(Json(ActivateBody { status: "ok", message, report }))
}

// POST /slice/{name}/deactivate
async fn deactivate(State(app): State<AppState>, Path(name): Path<String>) -> Result<Json<DeactivateBody>, ApiError> {
    let report = app.engine.deactivate(&name).await?;
    Ok(Json(DeactivateBody {
        status: "ok",
        message: format!("Slice '{}' deactivated successfully.", name),
        warnings: report.warnings,
    }))
}

async fn get_status(State(app): State<AppState>) -> Json<StatusSnapshot> {
    Json(app.engine.status().await)
}

async fn list_slices(State(app): State<AppState>) -> Json<Vec<SliceDefinition>> {
    Json(app.engine.catalog().iter().cloned().collect())
}

async fn get_topology(State(app): State<AppState>) -> Json<TopologyView> {
    Json(app.engine.topology().await)
}

async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    let active = app.engine.reader().active_count().await;
    Json(app.health_tracker.get_health(app.engine.catalog().len(), active, app.engine.is_running()))
}
