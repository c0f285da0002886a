//! # Sitewatch Server
//!
//! Thin HTTP surface over the scan orchestrator: trigger scans, poll their
//! status and read the deduplicated issues and project snapshot.
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `POST /api/v1/scans` | accept a scan or rescan (202) |
//! | `GET /api/v1/scans/{id}` | scan status |
//! | `GET /api/v1/projects/{id}/snapshot` | severity counts |
//! | `GET /api/v1/projects/{id}/issues` | open issues |
//! | `GET /api/v1/projects/{id}/scans` | scans of a project |
//! | `GET /health` | liveness |

pub mod errors;
pub mod handlers;
pub mod routes;
pub mod state;

pub use errors::{AppError, AppResult};
pub use routes::create_router;
pub use state::AppState;
