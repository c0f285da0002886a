use axum::{
    Router,
    routing::{get, post},
};
use sitewatch_core::AuditStore;

use crate::{
    handlers::{projects, scans},
    state::AppState,
};

pub fn create_v1_router<S: AuditStore>() -> Router<AppState<S>> {
    Router::new()
        .route("/scans", post(scans::trigger_scan::<S>))
        .route("/scans/{id}", get(scans::get_scan::<S>))
        .route("/projects/{id}/snapshot", get(projects::get_snapshot::<S>))
        .route("/projects/{id}/issues", get(projects::list_issues::<S>))
        .route("/projects/{id}/scans", get(projects::list_scans::<S>))
}
