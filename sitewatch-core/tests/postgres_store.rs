#![cfg(feature = "postgres-tests")]

use std::sync::Arc;

use chrono::{Duration, Utc};
use sitewatch_core::{
    AnalysisOutcome, AuditStore, AuditTransaction, PostgresAuditStore, Result,
    TransactionCoordinator, issue_hash,
};
use sitewatch_model::{
    Finding, Issue, IssueId, ProjectId, ProjectStatus, Scan, ScanDiagnostics, ScanStatus,
    ScanType, Severity,
};
use sqlx::PgPool;

const TARGET: &str = "https://example.com/";

async fn running_scan(store: &PostgresAuditStore, project: ProjectId) -> Result<Scan> {
    let scan = Scan::new(
        project,
        TARGET,
        ScanType::Accessibility,
        serde_json::json!({ "depth": 2 }),
        Utc::now(),
    );
    store.insert_scan(&scan).await?;
    store.mark_scan_running(scan.id, Utc::now()).await
}

fn seed_issue(scan: &Scan, message: &str) -> Issue {
    let now = Utc::now();
    Issue {
        id: IssueId::new(),
        project_id: scan.project_id,
        scan_type: scan.scan_type,
        url: TARGET.to_string(),
        url_id: scan.url_id,
        message: message.to_string(),
        element: None,
        severity: Severity::High,
        tags: ["wcag2a".to_string()].into_iter().collect(),
        category: "accessibility".to_string(),
        help: None,
        element_path: None,
        details: None,
        issue_hash: Some(issue_hash(TARGET, message, None, scan.scan_type)),
        first_seen_at: now,
        last_seen_at: now,
        occurrence_count: 1,
        is_resolved: false,
        resolved_at: None,
        resolved_in_scan_id: None,
        owning_scan_id: scan.id,
    }
}

#[sqlx::test(migrator = "sitewatch_core::MIGRATOR")]
async fn scan_rows_survive_a_roundtrip(pool: PgPool) -> Result<()> {
    let store = PostgresAuditStore::new(pool);
    let project = ProjectId::new();
    let scan = running_scan(&store, project).await?;

    let loaded = store.get_scan(scan.id).await?.expect("scan stored");
    assert_eq!(loaded.status, ScanStatus::Running);
    assert_eq!(loaded.url, TARGET);
    assert_eq!(loaded.url_id, scan.url_id);
    assert_eq!(loaded.config, serde_json::json!({ "depth": 2 }));

    let err = store.insert_scan(&scan).await.expect_err("duplicate id");
    assert!(matches!(err, sitewatch_core::AuditError::Conflict(_)));

    let listed = store.list_scans(project).await?;
    assert_eq!(listed.len(), 1);
    Ok(())
}

#[sqlx::test(migrator = "sitewatch_core::MIGRATOR")]
async fn coordinator_commits_issues_scan_and_snapshot(pool: PgPool) -> Result<()> {
    let store = Arc::new(PostgresAuditStore::new(pool));
    let project = ProjectId::new();
    let scan = running_scan(&store, project).await?;
    let coordinator = TransactionCoordinator::new(Arc::clone(&store));

    let findings = vec![
        Finding::new("", "img missing alt", Severity::Critical).with_element("<img>"),
        Finding::new("", "link has no discernible text", Severity::Low).with_element("<a>"),
    ];
    let commit = coordinator
        .finalize(
            scan.id,
            false,
            AnalysisOutcome::completed(findings, ScanDiagnostics::default()),
        )
        .await?;
    assert_eq!(commit.status, ScanStatus::Completed);
    assert_eq!(commit.delta.expect("delta").created.len(), 2);

    let snapshot = store.project_snapshot(project).await?.expect("snapshot stored");
    assert_eq!(snapshot.total_issues, 2);
    assert_eq!(snapshot.critical_issues, 1);
    assert_eq!(snapshot.low_issues, 1);
    assert_eq!(snapshot.status, ProjectStatus::Warning);
    assert_eq!(store.scan_findings(scan.id).await?.len(), 2);

    store
        .restart_scan(scan.id, serde_json::Value::Null, Utc::now())
        .await?;
    assert!(store.scan_findings(scan.id).await?.is_empty());

    let commit = coordinator
        .finalize(
            scan.id,
            true,
            AnalysisOutcome::completed(Vec::new(), ScanDiagnostics::default()),
        )
        .await?;
    assert_eq!(commit.delta.expect("delta").resolved.len(), 2);
    assert!(store.list_issues(project, false).await?.is_empty());

    let resolved = store.list_issues(project, true).await?;
    assert!(resolved.iter().all(|issue| issue.resolved_in_scan_id == Some(scan.id)));

    let snapshot = store.project_snapshot(project).await?.expect("snapshot stored");
    assert_eq!(snapshot.total_issues, 0);
    assert_eq!(snapshot.status, ProjectStatus::Active);
    Ok(())
}

#[sqlx::test(migrator = "sitewatch_core::MIGRATOR")]
async fn racing_inserts_merge_into_one_open_issue(pool: PgPool) -> Result<()> {
    let store = PostgresAuditStore::new(pool);
    let project = ProjectId::new();
    let scan = running_scan(&store, project).await?;

    let first = seed_issue(&scan, "img missing alt");
    let mut second = seed_issue(&scan, "img missing alt");
    second.last_seen_at = first.last_seen_at + Duration::seconds(30);

    let mut tx = store.begin().await?;
    let stored_first = tx.insert_issue(&first).await?;
    let stored_second = tx.insert_issue(&second).await?;
    tx.commit().await?;

    assert_eq!(stored_first.id, first.id);
    assert_eq!(stored_second.id, first.id, "same identity merges");
    assert_eq!(stored_second.occurrence_count, 2);
    assert_eq!(
        stored_second.last_seen_at.timestamp_micros(),
        second.last_seen_at.timestamp_micros()
    );

    let open = store.list_issues(project, false).await?;
    assert_eq!(open.len(), 1);
    Ok(())
}

#[sqlx::test(migrator = "sitewatch_core::MIGRATOR")]
async fn rolled_back_transaction_leaves_no_trace(pool: PgPool) -> Result<()> {
    let store = PostgresAuditStore::new(pool);
    let project = ProjectId::new();
    let scan = running_scan(&store, project).await?;

    let mut tx = store.begin().await?;
    tx.insert_issue(&seed_issue(&scan, "heading order skips a level"))
        .await?;
    tx.rollback().await?;

    assert!(store.list_issues(project, true).await?.is_empty());
    Ok(())
}

#[sqlx::test(migrator = "sitewatch_core::MIGRATOR")]
async fn fail_scan_only_touches_unfinished_scans(pool: PgPool) -> Result<()> {
    let store = Arc::new(PostgresAuditStore::new(pool));
    let project = ProjectId::new();
    let scan = running_scan(&store, project).await?;

    assert!(store.fail_scan(scan.id, "worker lost", Utc::now()).await?);
    let failed = store.get_scan(scan.id).await?.expect("scan stored");
    assert_eq!(failed.status, ScanStatus::Failed);
    assert_eq!(failed.error_message.as_deref(), Some("worker lost"));

    assert!(!store.fail_scan(scan.id, "again", Utc::now()).await?);
    let unchanged = store.get_scan(scan.id).await?.expect("scan stored");
    assert_eq!(unchanged.error_message.as_deref(), Some("worker lost"));
    Ok(())
}

#[sqlx::test(migrator = "sitewatch_core::MIGRATOR")]
async fn prior_scan_check_follows_history_not_status(pool: PgPool) -> Result<()> {
    let store = Arc::new(PostgresAuditStore::new(pool));
    let project = ProjectId::new();
    let first = running_scan(&store, project).await?;

    let mut tx = store.begin().await?;
    assert!(
        !tx.has_prior_scan(project, ScanType::Accessibility, first.url_id, first.id)
            .await?
    );
    tx.rollback().await?;

    assert!(store.fail_scan(first.id, "every analyzer failed", Utc::now()).await?);
    let second = running_scan(&store, project).await?;

    let mut tx = store.begin().await?;
    assert!(
        tx.has_prior_scan(project, ScanType::Accessibility, second.url_id, second.id)
            .await?
    );
    tx.rollback().await?;
    Ok(())
}
