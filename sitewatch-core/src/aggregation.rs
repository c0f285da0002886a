use chrono::{DateTime, Utc};
use sitewatch_model::{ProjectId, ProjectSnapshot};
use tracing::debug;

use crate::error::Result;
use crate::persistence::AuditTransaction;

/// Rebuilds a project's snapshot from its unresolved issues.
///
/// Always a full recount; the snapshot is a projection and never updated
/// incrementally.
#[derive(Debug, Clone, Copy, Default)]
pub struct AggregationEngine;

impl AggregationEngine {
    pub fn new() -> Self {
        Self
    }

    pub async fn recompute<T>(
        &self,
        tx: &mut T,
        project: ProjectId,
        now: DateTime<Utc>,
    ) -> Result<ProjectSnapshot>
    where
        T: AuditTransaction,
    {
        let counts = tx.count_open_issues(project).await?;
        let snapshot = ProjectSnapshot::from_counts(project, counts, Some(now));
        tx.write_snapshot(&snapshot).await?;

        debug!(
            target: "scan::aggregation",
            project_id = %project,
            total = snapshot.total_issues,
            critical = snapshot.critical_issues,
            status = snapshot.status.as_str(),
            "project snapshot recomputed"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use sitewatch_model::{
        Issue, IssueId, ProjectStatus, Scan, ScanType, Severity,
    };

    use super::*;
    use crate::fingerprint::issue_hash;
    use crate::persistence::{AuditStore, InMemoryAuditStore};

    fn issue(scan: &Scan, message: &str, severity: Severity) -> Issue {
        let now = Utc::now();
        Issue {
            id: IssueId::new(),
            project_id: scan.project_id,
            scan_type: scan.scan_type,
            url: scan.url.clone(),
            url_id: scan.url_id,
            message: message.into(),
            element: None,
            severity,
            tags: BTreeSet::new(),
            category: scan.scan_type.as_str().into(),
            help: None,
            element_path: None,
            details: None,
            issue_hash: Some(issue_hash(&scan.url, message, None, scan.scan_type)),
            first_seen_at: now,
            last_seen_at: now,
            occurrence_count: 1,
            is_resolved: false,
            resolved_at: None,
            resolved_in_scan_id: None,
            owning_scan_id: scan.id,
        }
    }

    async fn completed_scan(store: &InMemoryAuditStore, project: ProjectId) -> Scan {
        let mut scan = Scan::new(
            project,
            "https://example.com/",
            ScanType::Security,
            serde_json::Value::Null,
            Utc::now(),
        );
        scan.mark_running(Utc::now()).unwrap();
        scan.complete(Utc::now(), Default::default()).unwrap();
        store.insert_scan(&scan).await.unwrap();
        scan
    }

    #[tokio::test]
    async fn counts_open_issues_by_severity() {
        let store = InMemoryAuditStore::new();
        let project = ProjectId::new();
        let scan = completed_scan(&store, project).await;

        let mut tx = store.begin().await.unwrap();
        tx.insert_issue(&issue(&scan, "weak cipher", Severity::High)).await.unwrap();
        tx.insert_issue(&issue(&scan, "no hsts", Severity::Medium)).await.unwrap();
        let fixed = tx
            .insert_issue(&issue(&scan, "old tls", Severity::Critical))
            .await
            .unwrap();
        tx.resolve_issue(fixed.id, scan.id, Utc::now()).await.unwrap();

        let now = Utc::now();
        let snapshot = AggregationEngine::new()
            .recompute(&mut tx, project, now)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(snapshot.total_issues, 2);
        assert_eq!(snapshot.high_issues, 1);
        assert_eq!(snapshot.medium_issues, 1);
        assert_eq!(snapshot.critical_issues, 0);
        assert_eq!(snapshot.status, ProjectStatus::Active);
        assert_eq!(snapshot.last_scan_at, Some(now));
        assert_eq!(store.project_snapshot(project).await.unwrap(), Some(snapshot));
    }

    #[tokio::test]
    async fn open_critical_issue_raises_warning() {
        let store = InMemoryAuditStore::new();
        let project = ProjectId::new();
        let scan = completed_scan(&store, project).await;

        let mut tx = store.begin().await.unwrap();
        tx.insert_issue(&issue(&scan, "sql injection", Severity::Critical))
            .await
            .unwrap();
        let snapshot = AggregationEngine::new()
            .recompute(&mut tx, project, Utc::now())
            .await
            .unwrap();

        assert_eq!(snapshot.status, ProjectStatus::Warning);
        assert_eq!(snapshot.critical_issues, 1);
    }

    #[tokio::test]
    async fn other_projects_do_not_leak_into_counts() {
        let store = InMemoryAuditStore::new();
        let project = ProjectId::new();
        let other = completed_scan(&store, ProjectId::new()).await;

        let mut tx = store.begin().await.unwrap();
        tx.insert_issue(&issue(&other, "foreign", Severity::Low)).await.unwrap();
        let snapshot = AggregationEngine::new()
            .recompute(&mut tx, project, Utc::now())
            .await
            .unwrap();
        assert_eq!(snapshot.total_issues, 0);
    }
}
