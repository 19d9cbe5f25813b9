//! HTTP trigger surface.
//!
//! Three routes, all thin wrappers over the core: `GET /` (service
//! info), `GET /api/health` (liveness plus the latest pass summary),
//! and `POST /api/devices/process` (queue a pass now). Pass execution
//! stays inside the scheduler; a trigger arriving mid-pass coalesces.

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router, extract::State};
use serde::Serialize;
use tokio::sync::watch;

use vigil_core::{PassSummary, TriggerHandle};

#[derive(Clone)]
pub struct AppState {
    pub trigger: TriggerHandle,
    pub summaries: watch::Receiver<Option<PassSummary>>,
}

#[derive(Debug, Serialize)]
struct ServiceInfo {
    service: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    /// `None` until the first pass completes.
    last_pass: Option<PassSummary>,
}

#[derive(Debug, Serialize)]
struct ProcessResponse {
    status: &'static str,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/health", get(health))
        .route("/api/devices/process", post(process_devices))
        .with_state(state)
}

async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: "vigil",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        last_pass: state.summaries.borrow().clone(),
    })
}

async fn process_devices(State(state): State<AppState>) -> (StatusCode, Json<ProcessResponse>) {
    let queued = state.trigger.trigger();
    let status = if queued { "queued" } else { "coalesced" };
    (StatusCode::ACCEPTED, Json(ProcessResponse { status }))
}
