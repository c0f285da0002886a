use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use sitewatch_core::AuditStore;
use sitewatch_model::{ScanAccepted, ScanId, ScanTriggerRequest, ScanView};
use tracing::debug;

use crate::errors::AppResult;
use crate::state::AppState;

/// Accept a scan or rescan. Analysis continues after the response.
pub async fn trigger_scan<S: AuditStore>(
    State(state): State<AppState<S>>,
    Json(request): Json<ScanTriggerRequest>,
) -> AppResult<(StatusCode, Json<ScanAccepted>)> {
    debug!(
        project_id = %request.project_id,
        scan_type = request.scan_type.as_str(),
        rescan = request.scan_id.is_some(),
        "scan requested"
    );
    let accepted = state.orchestrator.start_scan(request).await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

pub async fn get_scan<S: AuditStore>(
    State(state): State<AppState<S>>,
    Path(scan_id): Path<ScanId>,
) -> AppResult<Json<ScanView>> {
    Ok(Json(state.orchestrator.scan_status(scan_id).await?))
}
