use axum::{extract::State, Json};
use blaster_core::JobStatus;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health: liveness probe, returns server metadata.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let pending = state
        .store
        .list_by_status(JobStatus::Scheduled)
        .map(|jobs| jobs.len())
        .ok();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "git_sha": env!("BLASTER_GIT_SHA"),
        "build_profile": env!("BLASTER_BUILD_PROFILE"),
        "transport_ready": state.transport.is_ready(),
        "armed_jobs": state.scheduler.armed_count(),
        "scheduled_jobs": pending,
        "ws_clients": state.ws_clients.len(),
    }))
}
