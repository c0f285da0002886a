use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sitewatch_model::{
    Issue, IssueHash, IssueId, ProjectId, ProjectSnapshot, Scan, ScanFindingRecord,
    ScanId, ScanStatus, ScanType, SeverityCounts, UrlId,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{AuditStore, AuditTransaction};
use crate::error::{AuditError, Result};

#[derive(Debug, Clone, Default)]
struct AuditState {
    scans: HashMap<ScanId, Scan>,
    issues: HashMap<IssueId, Issue>,
    findings: HashMap<ScanId, Vec<ScanFindingRecord>>,
    snapshots: HashMap<ProjectId, ProjectSnapshot>,
}

impl AuditState {
    fn scan_mut(&mut self, id: ScanId) -> Result<&mut Scan> {
        self.scans
            .get_mut(&id)
            .ok_or_else(|| AuditError::NotFound(format!("scan {id}")))
    }

    fn open_issue(
        &self,
        project: ProjectId,
        scan_type: ScanType,
        hash: &IssueHash,
    ) -> Option<&Issue> {
        self.issues.values().find(|issue| {
            issue.is_open()
                && issue.project_id == project
                && issue.scan_type == scan_type
                && issue.issue_hash.as_ref() == Some(hash)
        })
    }
}

/// Process-local store. Used when no database is configured and in tests.
///
/// A transaction takes the state lock for its whole lifetime and mutates a
/// private copy; commit swaps the copy in.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAuditStore {
    state: Arc<Mutex<AuditState>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug)]
pub struct InMemoryTransaction {
    guard: OwnedMutexGuard<AuditState>,
    working: AuditState,
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    type Tx = InMemoryTransaction;

    async fn begin(&self) -> Result<Self::Tx> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(InMemoryTransaction { guard, working })
    }

    async fn insert_scan(&self, scan: &Scan) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.scans.contains_key(&scan.id) {
            return Err(AuditError::Conflict(format!(
                "scan {} already exists",
                scan.id
            )));
        }
        state.scans.insert(scan.id, scan.clone());
        Ok(())
    }

    async fn get_scan(&self, id: ScanId) -> Result<Option<Scan>> {
        Ok(self.state.lock().await.scans.get(&id).cloned())
    }

    async fn list_scans(&self, project: ProjectId) -> Result<Vec<Scan>> {
        let state = self.state.lock().await;
        let mut scans: Vec<Scan> = state
            .scans
            .values()
            .filter(|scan| scan.project_id == project)
            .cloned()
            .collect();
        scans.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(scans)
    }

    async fn mark_scan_running(&self, id: ScanId, at: DateTime<Utc>) -> Result<Scan> {
        let mut state = self.state.lock().await;
        let scan = state.scan_mut(id)?;
        scan.mark_running(at)?;
        Ok(scan.clone())
    }

    async fn restart_scan(
        &self,
        id: ScanId,
        config: serde_json::Value,
        at: DateTime<Utc>,
    ) -> Result<Scan> {
        let mut state = self.state.lock().await;
        let scan = state.scan_mut(id)?;
        scan.restart(config, at)?;
        let scan = scan.clone();
        state.findings.remove(&id);
        Ok(scan)
    }

    async fn fail_scan(
        &self,
        id: ScanId,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(scan) = state.scans.get_mut(&id) else {
            return Ok(false);
        };
        match scan.status {
            ScanStatus::Pending | ScanStatus::Running => {
                scan.status = ScanStatus::Failed;
                scan.completed_at = Some(at);
                scan.error_message = Some(message.to_string());
                Ok(true)
            }
            ScanStatus::Completed | ScanStatus::Failed => Ok(false),
        }
    }

    async fn project_snapshot(
        &self,
        project: ProjectId,
    ) -> Result<Option<ProjectSnapshot>> {
        Ok(self.state.lock().await.snapshots.get(&project).cloned())
    }

    async fn list_issues(
        &self,
        project: ProjectId,
        include_resolved: bool,
    ) -> Result<Vec<Issue>> {
        let state = self.state.lock().await;
        let mut issues: Vec<Issue> = state
            .issues
            .values()
            .filter(|issue| issue.project_id == project)
            .filter(|issue| include_resolved || issue.is_open())
            .cloned()
            .collect();
        issues.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then(a.first_seen_at.cmp(&b.first_seen_at))
                .then(a.id.as_uuid().cmp(b.id.as_uuid()))
        });
        Ok(issues)
    }

    async fn scan_findings(&self, scan: ScanId) -> Result<Vec<ScanFindingRecord>> {
        Ok(self
            .state
            .lock()
            .await
            .findings
            .get(&scan)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl AuditTransaction for InMemoryTransaction {
    async fn find_open_issue(
        &mut self,
        project: ProjectId,
        scan_type: ScanType,
        hash: &IssueHash,
    ) -> Result<Option<Issue>> {
        Ok(self.working.open_issue(project, scan_type, hash).cloned())
    }

    async fn insert_issue(&mut self, issue: &Issue) -> Result<Issue> {
        let existing = issue.issue_hash.as_ref().and_then(|hash| {
            self.working
                .open_issue(issue.project_id, issue.scan_type, hash)
                .map(|open| open.id)
        });

        if let Some(id) = existing
            && let Some(open) = self.working.issues.get_mut(&id)
        {
            open.last_seen_at = open.last_seen_at.max(issue.last_seen_at);
            open.occurrence_count = open.occurrence_count.saturating_add(1);
            open.owning_scan_id = issue.owning_scan_id;
            return Ok(open.clone());
        }

        self.working.issues.insert(issue.id, issue.clone());
        Ok(issue.clone())
    }

    async fn update_issue(&mut self, issue: &Issue) -> Result<()> {
        match self.working.issues.get_mut(&issue.id) {
            Some(slot) => {
                *slot = issue.clone();
                Ok(())
            }
            None => Err(AuditError::NotFound(format!("issue {}", issue.id))),
        }
    }

    async fn open_issues_for_target(
        &mut self,
        project: ProjectId,
        scan_type: ScanType,
        url_id: UrlId,
    ) -> Result<Vec<Issue>> {
        Ok(self
            .working
            .issues
            .values()
            .filter(|issue| {
                issue.is_open()
                    && issue.project_id == project
                    && issue.scan_type == scan_type
                    && issue.url_id == url_id
            })
            .cloned()
            .collect())
    }

    async fn resolve_issue(
        &mut self,
        id: IssueId,
        scan: ScanId,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let issue = self
            .working
            .issues
            .get_mut(&id)
            .ok_or_else(|| AuditError::NotFound(format!("issue {id}")))?;
        issue.is_resolved = true;
        issue.resolved_at = Some(at);
        issue.resolved_in_scan_id = Some(scan);
        Ok(())
    }

    async fn has_prior_scan(
        &mut self,
        project: ProjectId,
        scan_type: ScanType,
        url_id: UrlId,
        excluding: ScanId,
    ) -> Result<bool> {
        Ok(self.working.scans.values().any(|scan| {
            scan.id != excluding
                && scan.project_id == project
                && scan.scan_type == scan_type
                && scan.url_id == url_id
        }))
    }

    async fn record_findings(&mut self, records: &[ScanFindingRecord]) -> Result<()> {
        for record in records {
            self.working
                .findings
                .entry(record.scan_id)
                .or_default()
                .push(record.clone());
        }
        Ok(())
    }

    async fn get_scan(&mut self, id: ScanId) -> Result<Option<Scan>> {
        Ok(self.working.scans.get(&id).cloned())
    }

    async fn finish_scan(&mut self, scan: &Scan) -> Result<()> {
        let slot = self.working.scan_mut(scan.id)?;
        *slot = scan.clone();
        Ok(())
    }

    async fn count_open_issues(&mut self, project: ProjectId) -> Result<SeverityCounts> {
        let scans = &self.working.scans;
        Ok(self
            .working
            .issues
            .values()
            .filter(|issue| issue.project_id == project && issue.is_open())
            .filter(|issue| {
                scans
                    .get(&issue.owning_scan_id)
                    .is_some_and(|scan| scan.status == ScanStatus::Completed)
            })
            .map(|issue| issue.severity)
            .collect())
    }

    async fn write_snapshot(&mut self, snapshot: &ProjectSnapshot) -> Result<()> {
        self.working
            .snapshots
            .insert(snapshot.project_id, snapshot.clone());
        Ok(())
    }

    async fn commit(mut self) -> Result<()> {
        *self.guard = self.working;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use sitewatch_model::{IssueId, Severity};

    use super::*;
    use crate::fingerprint::issue_hash;

    const URL: &str = "https://example.com/";

    fn running_scan(project: ProjectId) -> Scan {
        let mut scan = Scan::new(
            project,
            URL,
            ScanType::Accessibility,
            serde_json::Value::Null,
            Utc::now(),
        );
        scan.mark_running(Utc::now()).unwrap();
        scan
    }

    fn open_issue(scan: &Scan, message: &str) -> Issue {
        let now = Utc::now();
        Issue {
            id: IssueId::new(),
            project_id: scan.project_id,
            scan_type: scan.scan_type,
            url: scan.url.clone(),
            url_id: scan.url_id,
            message: message.to_string(),
            element: None,
            severity: Severity::Medium,
            tags: BTreeSet::new(),
            category: "accessibility".into(),
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

    #[tokio::test]
    async fn dropped_transaction_leaves_no_trace() {
        let store = InMemoryAuditStore::new();
        let scan = running_scan(ProjectId::new());
        store.insert_scan(&scan).await.unwrap();

        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_issue(&open_issue(&scan, "orphan")).await.unwrap();
        }

        let issues = store.list_issues(scan.project_id, true).await.unwrap();
        assert!(issues.is_empty());
    }

    #[tokio::test]
    async fn committed_writes_become_visible() {
        let store = InMemoryAuditStore::new();
        let scan = running_scan(ProjectId::new());
        store.insert_scan(&scan).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.insert_issue(&open_issue(&scan, "kept")).await.unwrap();
        tx.commit().await.unwrap();

        let issues = store.list_issues(scan.project_id, false).await.unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].message, "kept");
    }

    #[tokio::test]
    async fn second_open_insert_with_same_hash_merges() {
        let store = InMemoryAuditStore::new();
        let scan = running_scan(ProjectId::new());
        store.insert_scan(&scan).await.unwrap();

        let first = open_issue(&scan, "dup");
        let second = open_issue(&scan, "dup");

        let mut tx = store.begin().await.unwrap();
        let stored_first = tx.insert_issue(&first).await.unwrap();
        let stored_second = tx.insert_issue(&second).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(stored_first.id, first.id);
        assert_eq!(stored_second.id, first.id);
        assert_eq!(stored_second.occurrence_count, 2);
        assert_eq!(
            store.list_issues(scan.project_id, true).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn fail_scan_ignores_terminal_scans() {
        let store = InMemoryAuditStore::new();
        let mut scan = running_scan(ProjectId::new());
        store.insert_scan(&scan).await.unwrap();

        assert!(store.fail_scan(scan.id, "boom", Utc::now()).await.unwrap());
        let failed = store.get_scan(scan.id).await.unwrap().unwrap();
        assert_eq!(failed.status, ScanStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("boom"));

        scan.id = ScanId::new();
        assert!(!store.fail_scan(scan.id, "missing", Utc::now()).await.unwrap());
        assert!(!store.fail_scan(failed.id, "again", Utc::now()).await.unwrap());
        let unchanged = store.get_scan(failed.id).await.unwrap().unwrap();
        assert_eq!(unchanged.error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn open_issue_counts_require_completed_owner() {
        let store = InMemoryAuditStore::new();
        let project = ProjectId::new();
        let scan = running_scan(project);
        store.insert_scan(&scan).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.insert_issue(&open_issue(&scan, "pending owner")).await.unwrap();
        assert_eq!(tx.count_open_issues(project).await.unwrap().total(), 0);

        let mut done = scan.clone();
        done.complete(Utc::now(), Default::default()).unwrap();
        tx.finish_scan(&done).await.unwrap();
        assert_eq!(tx.count_open_issues(project).await.unwrap().medium, 1);
        tx.rollback().await.unwrap();
    }
}
