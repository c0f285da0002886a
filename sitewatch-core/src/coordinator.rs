//! One atomic unit per scan completion.
//!
//! Issue reconciliation, the terminal scan write and the snapshot
//! recomputation either all commit or all roll back. When they roll back
//! the scan is failed in a separate write so it never stays `Running`.

use std::sync::Arc;

use chrono::Utc;
use sitewatch_model::{
    Finding, ProjectSnapshot, ScanDelta, ScanDiagnostics, ScanId, ScanStatus,
};
use tracing::{error, info, warn};

use crate::aggregation::AggregationEngine;
use crate::error::{AuditError, Result};
use crate::lifecycle::{IssueLifecycleTracker, ScanContext};
use crate::persistence::{AuditStore, AuditTransaction};

/// What the analyzer chain produced for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisOutcome {
    pub findings: Vec<Finding>,
    pub diagnostics: ScanDiagnostics,
    /// Set on total analysis failure. The scan is committed as Failed with
    /// this message and no issue is touched.
    pub fatal: Option<String>,
}

impl AnalysisOutcome {
    pub fn completed(findings: Vec<Finding>, diagnostics: ScanDiagnostics) -> Self {
        Self {
            findings,
            diagnostics,
            fatal: None,
        }
    }

    pub fn failed(message: impl Into<String>, diagnostics: ScanDiagnostics) -> Self {
        Self {
            findings: Vec::new(),
            diagnostics,
            fatal: Some(message.into()),
        }
    }
}

/// Result of a committed unit.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanCommit {
    pub status: ScanStatus,
    /// `None` when the scan failed and reconciliation was skipped.
    pub delta: Option<ScanDelta>,
    pub snapshot: ProjectSnapshot,
}

pub struct TransactionCoordinator<S: AuditStore> {
    store: Arc<S>,
    tracker: IssueLifecycleTracker,
    aggregation: AggregationEngine,
}

impl<S: AuditStore> Clone for TransactionCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            tracker: self.tracker,
            aggregation: self.aggregation,
        }
    }
}

impl<S: AuditStore> std::fmt::Debug for TransactionCoordinator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("store", &std::any::type_name::<S>())
            .finish()
    }
}

impl<S: AuditStore> TransactionCoordinator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            tracker: IssueLifecycleTracker::new(),
            aggregation: AggregationEngine::new(),
        }
    }

    /// Commit the outcome of a running scan.
    ///
    /// On error nothing from the unit is visible and the scan has been
    /// marked Failed, unless it had already reached a terminal state.
    pub async fn finalize(
        &self,
        scan_id: ScanId,
        is_rescan: bool,
        outcome: AnalysisOutcome,
    ) -> Result<ScanCommit> {
        let mut tx = match self.store.begin().await {
            Ok(tx) => tx,
            Err(err) => {
                self.fail_standalone(scan_id, &err).await;
                return Err(err);
            }
        };

        let applied = self.apply(&mut tx, scan_id, is_rescan, outcome).await;
        let committed = match applied {
            Ok(commit) => tx.commit().await.map(|()| commit),
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(
                        target: "scan::coordinator",
                        %scan_id,
                        error = %rollback_err,
                        "rollback failed"
                    );
                }
                Err(err)
            }
        };

        match committed {
            Ok(commit) => {
                info!(
                    target: "scan::coordinator",
                    %scan_id,
                    status = commit.status.as_str(),
                    open_issues = commit.snapshot.total_issues,
                    "scan committed"
                );
                Ok(commit)
            }
            Err(err) => {
                self.fail_standalone(scan_id, &err).await;
                Err(err)
            }
        }
    }

    async fn apply(
        &self,
        tx: &mut S::Tx,
        scan_id: ScanId,
        is_rescan: bool,
        outcome: AnalysisOutcome,
    ) -> Result<ScanCommit> {
        let now = Utc::now();
        let mut scan = tx
            .get_scan(scan_id)
            .await?
            .ok_or_else(|| AuditError::NotFound(format!("scan {scan_id}")))?;

        let AnalysisOutcome {
            findings,
            mut diagnostics,
            fatal,
        } = outcome;

        let delta = match fatal {
            Some(message) => {
                scan.fail(now, message, Some(diagnostics))?;
                None
            }
            None => {
                let ctx = ScanContext::for_scan(&scan, is_rescan);
                let delta = self.tracker.reconcile(tx, &ctx, findings, now).await?;
                diagnostics.delta = Some(delta.clone());
                scan.complete(now, diagnostics)?;
                Some(delta)
            }
        };

        tx.finish_scan(&scan).await?;
        let snapshot = self.aggregation.recompute(tx, scan.project_id, now).await?;

        Ok(ScanCommit {
            status: scan.status,
            delta,
            snapshot,
        })
    }

    async fn fail_standalone(&self, scan_id: ScanId, cause: &AuditError) {
        let message = format!("failed to persist scan results: {cause}");
        match self.store.fail_scan(scan_id, &message, Utc::now()).await {
            Ok(true) => warn!(
                target: "scan::coordinator",
                %scan_id,
                error = %cause,
                "scan results rolled back; scan marked failed"
            ),
            Ok(false) => warn!(
                target: "scan::coordinator",
                %scan_id,
                error = %cause,
                "scan results rolled back; scan already terminal"
            ),
            Err(fail_err) => error!(
                target: "scan::coordinator",
                %scan_id,
                error = %cause,
                fail_error = %fail_err,
                "could not mark scan failed after rollback"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use sitewatch_model::{ProjectId, ProjectStatus, Scan, ScanType, Severity};

    use super::*;
    use crate::persistence::InMemoryAuditStore;

    async fn running_scan(store: &InMemoryAuditStore) -> Scan {
        let mut scan = Scan::new(
            ProjectId::new(),
            "https://example.com/",
            ScanType::Accessibility,
            serde_json::Value::Null,
            Utc::now(),
        );
        scan.mark_running(Utc::now()).unwrap();
        store.insert_scan(&scan).await.unwrap();
        scan
    }

    fn critical() -> Finding {
        Finding::new("https://example.com/", "form without label", Severity::Critical)
            .with_element("<input>")
    }

    #[tokio::test]
    async fn successful_outcome_completes_scan_and_snapshot() {
        let store = Arc::new(InMemoryAuditStore::new());
        let scan = running_scan(&store).await;
        let coordinator = TransactionCoordinator::new(Arc::clone(&store));

        let commit = coordinator
            .finalize(
                scan.id,
                false,
                AnalysisOutcome::completed(vec![critical()], ScanDiagnostics::default()),
            )
            .await
            .unwrap();

        assert_eq!(commit.status, ScanStatus::Completed);
        assert_eq!(commit.delta.as_ref().map(|d| d.created.len()), Some(1));
        assert_eq!(commit.snapshot.status, ProjectStatus::Warning);

        let stored = store.get_scan(scan.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ScanStatus::Completed);
        assert!(stored.completed_at.is_some());
        let diagnostics = stored.diagnostics.unwrap();
        assert_eq!(diagnostics.delta.unwrap().created.len(), 1);
    }

    #[tokio::test]
    async fn fatal_outcome_fails_scan_without_resolving() {
        let store = Arc::new(InMemoryAuditStore::new());
        let scan = running_scan(&store).await;
        let coordinator = TransactionCoordinator::new(Arc::clone(&store));
        coordinator
            .finalize(
                scan.id,
                false,
                AnalysisOutcome::completed(vec![critical()], ScanDiagnostics::default()),
            )
            .await
            .unwrap();

        store
            .restart_scan(scan.id, serde_json::Value::Null, Utc::now())
            .await
            .unwrap();
        let commit = coordinator
            .finalize(
                scan.id,
                true,
                AnalysisOutcome::failed("all analyzers failed", ScanDiagnostics::default()),
            )
            .await
            .unwrap();

        assert_eq!(commit.status, ScanStatus::Failed);
        assert!(commit.delta.is_none());

        let issues = store.list_issues(scan.project_id, true).await.unwrap();
        assert_eq!(issues.len(), 1);
        assert!(!issues[0].is_resolved);

        let stored = store.get_scan(scan.id).await.unwrap().unwrap();
        assert_eq!(stored.error_message.as_deref(), Some("all analyzers failed"));
    }

    #[tokio::test]
    async fn finalizing_a_terminal_scan_changes_nothing() {
        let store = Arc::new(InMemoryAuditStore::new());
        let scan = running_scan(&store).await;
        store.fail_scan(scan.id, "earlier failure", Utc::now()).await.unwrap();
        let coordinator = TransactionCoordinator::new(Arc::clone(&store));

        let result = coordinator
            .finalize(
                scan.id,
                false,
                AnalysisOutcome::completed(vec![critical()], ScanDiagnostics::default()),
            )
            .await;
        assert!(matches!(result, Err(AuditError::Model(_))));

        assert!(store.list_issues(scan.project_id, true).await.unwrap().is_empty());
        assert!(store.project_snapshot(scan.project_id).await.unwrap().is_none());
        let stored = store.get_scan(scan.id).await.unwrap().unwrap();
        assert_eq!(stored.error_message.as_deref(), Some("earlier failure"));
    }

    #[tokio::test]
    async fn unknown_scan_is_not_found() {
        let store = Arc::new(InMemoryAuditStore::new());
        let coordinator = TransactionCoordinator::new(store);
        let result = coordinator
            .finalize(ScanId::new(), false, AnalysisOutcome::default())
            .await;
        assert!(matches!(result, Err(AuditError::NotFound(_))));
    }
}
