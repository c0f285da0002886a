pub mod projects;
pub mod scans;

use axum::{Json, extract::State};
use serde_json::{Value, json};
use sitewatch_core::AuditStore;

use crate::state::AppState;

pub async fn health<S: AuditStore>(State(state): State<AppState<S>>) -> Json<Value> {
    let config = state.orchestrator.config();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "workers": config.workers,
        "queue_capacity": config.queue_capacity,
    }))
}
