use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use sitewatch_core::AuditStore;
use sitewatch_model::{Issue, ProjectId, ProjectSnapshot, ScanView};

use crate::errors::AppResult;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct IssueQuery {
    #[serde(default)]
    pub include_resolved: bool,
}

pub async fn get_snapshot<S: AuditStore>(
    State(state): State<AppState<S>>,
    Path(project_id): Path<ProjectId>,
) -> AppResult<Json<ProjectSnapshot>> {
    Ok(Json(state.orchestrator.project_snapshot(project_id).await?))
}

/// Open issues, most severe first. `?include_resolved=true` adds the
/// resolved history.
pub async fn list_issues<S: AuditStore>(
    State(state): State<AppState<S>>,
    Path(project_id): Path<ProjectId>,
    Query(query): Query<IssueQuery>,
) -> AppResult<Json<Vec<Issue>>> {
    let issues = state
        .orchestrator
        .issues(project_id, query.include_resolved)
        .await?;
    Ok(Json(issues))
}

pub async fn list_scans<S: AuditStore>(
    State(state): State<AppState<S>>,
    Path(project_id): Path<ProjectId>,
) -> AppResult<Json<Vec<ScanView>>> {
    Ok(Json(state.orchestrator.project_scans(project_id).await?))
}
