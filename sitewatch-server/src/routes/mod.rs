pub mod v1;

use axum::{Router, routing::get};
use sitewatch_core::AuditStore;

use crate::{handlers, state::AppState};

/// Create the main router with every API version and the health probe.
pub fn create_router<S: AuditStore>(state: AppState<S>) -> Router {
    Router::new()
        .route("/health", get(handlers::health::<S>))
        .nest("/api/v1", v1::create_v1_router::<S>())
        .with_state(state)
}
