//! Reduces the findings of one scan run into the deduplicated issue set.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use sitewatch_model::{
    Finding, Issue, IssueHash, IssueId, ProjectId, Scan, ScanDelta, ScanFindingRecord,
    ScanId, ScanType, UrlId,
};
use tracing::{debug, warn};

use crate::error::Result;
use crate::fingerprint::finding_hash;
use crate::persistence::AuditTransaction;

/// The scan a batch of findings belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanContext {
    pub scan_id: ScanId,
    pub project_id: ProjectId,
    pub scan_type: ScanType,
    /// Target URL. Findings without a URL of their own inherit it.
    pub url: String,
    pub url_id: UrlId,
    /// Set when the scan id was re-run.
    pub is_rescan: bool,
}

impl ScanContext {
    pub fn for_scan(scan: &Scan, is_rescan: bool) -> Self {
        Self {
            scan_id: scan.id,
            project_id: scan.project_id,
            scan_type: scan.scan_type,
            url: scan.url.clone(),
            url_id: scan.url_id,
            is_rescan,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IssueLifecycleTracker;

impl IssueLifecycleTracker {
    pub fn new() -> Self {
        Self
    }

    /// Match, create, update and resolve issues for one scan run.
    ///
    /// Must run inside the transaction that also completes the scan.
    pub async fn reconcile<T>(
        &self,
        tx: &mut T,
        ctx: &ScanContext,
        findings: Vec<Finding>,
        now: DateTime<Utc>,
    ) -> Result<ScanDelta>
    where
        T: AuditTransaction,
    {
        let mut delta = ScanDelta::default();
        let mut seen = HashSet::new();
        let mut observed = Vec::with_capacity(findings.len());

        for mut finding in findings {
            if finding.url.is_empty() {
                finding.url.clone_from(&ctx.url);
            }

            let hash = finding_hash(&finding, ctx.scan_type);
            if !seen.insert(hash.clone()) {
                debug!(
                    target: "scan::lifecycle",
                    scan_id = %ctx.scan_id,
                    hash = %hash,
                    "duplicate finding in one run ignored"
                );
                continue;
            }

            let issue_id = match tx
                .find_open_issue(ctx.project_id, ctx.scan_type, &hash)
                .await?
            {
                Some(mut issue) => {
                    refresh(&mut issue, &finding, ctx.scan_id, now);
                    tx.update_issue(&issue).await?;
                    delta.recurring.push(issue.id);
                    issue.id
                }
                None => {
                    let candidate = new_issue(ctx, &finding, hash.clone(), now);
                    let stored = tx.insert_issue(&candidate).await?;
                    if stored.id == candidate.id {
                        delta.created.push(stored.id);
                    } else {
                        // Another writer opened the same identity first.
                        delta.recurring.push(stored.id);
                    }
                    stored.id
                }
            };

            observed.push(ScanFindingRecord {
                scan_id: ctx.scan_id,
                issue_id,
                issue_hash: hash,
                finding,
                observed_at: now,
            });
        }

        tx.record_findings(&observed).await?;

        let resolve = ctx.is_rescan
            || tx
                .has_prior_scan(ctx.project_id, ctx.scan_type, ctx.url_id, ctx.scan_id)
                .await?;

        if resolve {
            delta.resolved = self.resolve_missing(tx, ctx, &seen, now).await?;
        }

        debug!(
            target: "scan::lifecycle",
            scan_id = %ctx.scan_id,
            %delta,
            "issues reconciled"
        );
        Ok(delta)
    }

    async fn resolve_missing<T>(
        &self,
        tx: &mut T,
        ctx: &ScanContext,
        seen: &HashSet<IssueHash>,
        now: DateTime<Utc>,
    ) -> Result<Vec<IssueId>>
    where
        T: AuditTransaction,
    {
        let open = tx
            .open_issues_for_target(ctx.project_id, ctx.scan_type, ctx.url_id)
            .await?;

        let mut resolved = Vec::new();
        for issue in open {
            let Some(hash) = issue.issue_hash.as_ref() else {
                warn!(
                    target: "scan::lifecycle",
                    issue_id = %issue.id,
                    project_id = %issue.project_id,
                    "open issue has no identity hash; left unresolved"
                );
                continue;
            };
            if seen.contains(hash) {
                continue;
            }
            tx.resolve_issue(issue.id, ctx.scan_id, now).await?;
            resolved.push(issue.id);
        }
        Ok(resolved)
    }
}

fn new_issue(
    ctx: &ScanContext,
    finding: &Finding,
    hash: IssueHash,
    now: DateTime<Utc>,
) -> Issue {
    Issue {
        id: IssueId::new(),
        project_id: ctx.project_id,
        scan_type: ctx.scan_type,
        url: finding.url.clone(),
        url_id: ctx.url_id,
        message: finding.message.clone(),
        element: finding.element.clone(),
        severity: finding.severity,
        tags: finding.tags.iter().cloned().collect(),
        category: category_of(finding, ctx.scan_type),
        help: finding.help.clone(),
        element_path: finding.element_path.clone(),
        details: finding.details.clone(),
        issue_hash: Some(hash),
        first_seen_at: now,
        last_seen_at: now,
        occurrence_count: 1,
        is_resolved: false,
        resolved_at: None,
        resolved_in_scan_id: None,
        owning_scan_id: ctx.scan_id,
    }
}

/// Re-observation: identity fields stay, descriptive fields follow the
/// newest finding.
fn refresh(issue: &mut Issue, finding: &Finding, scan: ScanId, now: DateTime<Utc>) {
    issue.last_seen_at = now;
    issue.occurrence_count = issue.occurrence_count.saturating_add(1);
    issue.owning_scan_id = scan;
    issue.severity = finding.severity;
    issue.tags = finding.tags.iter().cloned().collect::<BTreeSet<_>>();
    issue.category = category_of(finding, issue.scan_type);
    issue.help.clone_from(&finding.help);
    issue.element_path.clone_from(&finding.element_path);
    issue.details.clone_from(&finding.details);
}

fn category_of(finding: &Finding, scan_type: ScanType) -> String {
    finding
        .category
        .clone()
        .unwrap_or_else(|| scan_type.as_str().to_string())
}
