use std::{any::type_name, fmt, sync::Arc};

use sitewatch_core::{AuditStore, ScanOrchestrator};

/// Shared handler state. Generic over the storage backend chosen at startup.
pub struct AppState<S: AuditStore> {
    pub orchestrator: Arc<ScanOrchestrator<S>>,
}

impl<S: AuditStore> AppState<S> {
    pub fn new(orchestrator: Arc<ScanOrchestrator<S>>) -> Self {
        Self { orchestrator }
    }
}

impl<S: AuditStore> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: Arc::clone(&self.orchestrator),
        }
    }
}

impl<S: AuditStore> fmt::Debug for AppState<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("store", &type_name::<S>())
            .finish_non_exhaustive()
    }
}
