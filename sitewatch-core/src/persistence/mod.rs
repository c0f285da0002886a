//! Storage ports for scans, issues and project snapshots.
//!
//! [`AuditStore`] covers reads and the small standalone scan writes.
//! Everything a scan completion changes goes through one
//! [`AuditTransaction`], which is all-or-nothing.

pub mod memory;
#[cfg(feature = "database")]
#[cfg_attr(docsrs, doc(cfg(feature = "database")))]
pub mod postgres;

pub use memory::{InMemoryAuditStore, InMemoryTransaction};
#[cfg(feature = "database")]
pub use postgres::{PostgresAuditStore, PostgresTransaction};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sitewatch_model::{
    Issue, IssueHash, IssueId, ProjectId, ProjectSnapshot, Scan, ScanFindingRecord,
    ScanId, ScanType, SeverityCounts, UrlId,
};

use crate::error::Result;

#[async_trait]
pub trait AuditStore: Send + Sync + 'static {
    type Tx: AuditTransaction + 'static;

    async fn begin(&self) -> Result<Self::Tx>;

    /// Persist a freshly created scan. Fails with `Conflict` if the id exists.
    async fn insert_scan(&self, scan: &Scan) -> Result<()>;

    async fn get_scan(&self, id: ScanId) -> Result<Option<Scan>>;

    /// Scans of a project, most recently started first.
    async fn list_scans(&self, project: ProjectId) -> Result<Vec<Scan>>;

    /// `Pending -> Running`.
    async fn mark_scan_running(&self, id: ScanId, at: DateTime<Utc>) -> Result<Scan>;

    /// Terminal -> `Running` under the same id. Raw findings attached to the
    /// previous run are discarded; issues are left alone.
    async fn restart_scan(
        &self,
        id: ScanId,
        config: serde_json::Value,
        at: DateTime<Utc>,
    ) -> Result<Scan>;

    /// Mark a scan Failed outside of any transaction.
    ///
    /// Only scans that are still Pending or Running are touched; returns
    /// whether a row changed.
    async fn fail_scan(
        &self,
        id: ScanId,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    async fn project_snapshot(
        &self,
        project: ProjectId,
    ) -> Result<Option<ProjectSnapshot>>;

    async fn list_issues(
        &self,
        project: ProjectId,
        include_resolved: bool,
    ) -> Result<Vec<Issue>>;

    async fn scan_findings(&self, scan: ScanId) -> Result<Vec<ScanFindingRecord>>;
}

/// One atomic unit of work. Dropping without [`commit`](Self::commit)
/// discards every write.
#[async_trait]
pub trait AuditTransaction: Send {
    /// The unresolved issue with this identity, if any.
    async fn find_open_issue(
        &mut self,
        project: ProjectId,
        scan_type: ScanType,
        hash: &IssueHash,
    ) -> Result<Option<Issue>>;

    /// Insert a new open issue.
    ///
    /// If another writer created an open issue with the same identity in
    /// the meantime the two are merged and the stored row is returned.
    async fn insert_issue(&mut self, issue: &Issue) -> Result<Issue>;

    async fn update_issue(&mut self, issue: &Issue) -> Result<()>;

    /// Every unresolved issue attached to one scan target.
    async fn open_issues_for_target(
        &mut self,
        project: ProjectId,
        scan_type: ScanType,
        url_id: UrlId,
    ) -> Result<Vec<Issue>>;

    async fn resolve_issue(
        &mut self,
        id: IssueId,
        scan: ScanId,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Whether this target has been scanned before under any id other than
    /// `excluding`, whatever that scan's current status. A rescan that
    /// ended Failed must not hide the earlier history of its target.
    async fn has_prior_scan(
        &mut self,
        project: ProjectId,
        scan_type: ScanType,
        url_id: UrlId,
        excluding: ScanId,
    ) -> Result<bool>;

    async fn record_findings(&mut self, records: &[ScanFindingRecord]) -> Result<()>;

    async fn get_scan(&mut self, id: ScanId) -> Result<Option<Scan>>;

    /// Write the terminal state of a scan (status, timestamps, error,
    /// diagnostics).
    async fn finish_scan(&mut self, scan: &Scan) -> Result<()>;

    /// Unresolved issues of the project owned by a Completed scan, grouped
    /// by severity.
    async fn count_open_issues(&mut self, project: ProjectId) -> Result<SeverityCounts>;

    async fn write_snapshot(&mut self, snapshot: &ProjectSnapshot) -> Result<()>;

    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}
