use std::{collections::BTreeSet, fmt};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sitewatch_model::{
    Finding, Issue, IssueHash, IssueId, ProjectId, ProjectSnapshot, Scan,
    ScanDiagnostics, ScanFindingRecord, ScanId, ScanType, SeverityCounts, UrlId,
};
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction, postgres::PgRow};
use tracing::info;
use uuid::Uuid;

use super::{AuditStore, AuditTransaction};
use crate::error::{AuditError, Result};

const SCAN_COLUMNS: &str = "id, project_id, url_id, url, scan_type, status, \
    started_at, completed_at, error_message, config, diagnostics";

const ISSUE_COLUMNS: &str = "id, project_id, scan_type, url, url_id, message, \
    element, severity, tags, category, help, element_path, details, issue_hash, \
    first_seen_at, last_seen_at, occurrence_count, is_resolved, resolved_at, \
    resolved_in_scan_id, owning_scan_id";

#[derive(Debug, Clone)]
pub struct PostgresAuditStore {
    pool: PgPool,
}

impl PostgresAuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply pending migrations and verify the pool answers.
    pub async fn migrate(&self) -> Result<()> {
        crate::MIGRATOR.run(&self.pool).await?;
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        info!(target: "scan::persistence", "audit schema is up to date");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Load a scan under a row lock, apply `change`, write it back.
    async fn modify_scan<F>(&self, id: ScanId, change: F) -> Result<Scan>
    where
        F: FnOnce(&mut Scan) -> Result<()> + Send,
    {
        let mut tx = self.pool.begin().await?;
        let query = format!("SELECT {SCAN_COLUMNS} FROM scans WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&query)
            .bind(id.to_uuid())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AuditError::NotFound(format!("scan {id}")))?;
        let mut scan = map_scan(&row)?;
        change(&mut scan)?;
        write_scan(&mut tx, &scan).await?;
        tx.commit().await?;
        Ok(scan)
    }
}

fn parse_text<T>(row: &PgRow, column: &str) -> Result<T>
where
    T: std::str::FromStr<Err = sitewatch_model::ModelError>,
{
    let raw: String = row.try_get(column)?;
    Ok(raw.parse::<T>()?)
}

fn count(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

fn map_scan(row: &PgRow) -> Result<Scan> {
    let diagnostics: Option<serde_json::Value> = row.try_get("diagnostics")?;
    let diagnostics = diagnostics
        .map(serde_json::from_value::<ScanDiagnostics>)
        .transpose()?;

    Ok(Scan {
        id: ScanId(row.try_get("id")?),
        project_id: ProjectId(row.try_get("project_id")?),
        url_id: UrlId(row.try_get("url_id")?),
        url: row.try_get("url")?,
        scan_type: parse_text(row, "scan_type")?,
        status: parse_text(row, "status")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        error_message: row.try_get("error_message")?,
        config: row.try_get("config")?,
        diagnostics,
    })
}

fn map_issue(row: &PgRow) -> Result<Issue> {
    let tags: Vec<String> = row.try_get("tags")?;
    let issue_hash: Option<String> = row.try_get("issue_hash")?;
    let resolved_in: Option<Uuid> = row.try_get("resolved_in_scan_id")?;

    Ok(Issue {
        id: IssueId(row.try_get("id")?),
        project_id: ProjectId(row.try_get("project_id")?),
        scan_type: parse_text(row, "scan_type")?,
        url: row.try_get("url")?,
        url_id: UrlId(row.try_get("url_id")?),
        message: row.try_get("message")?,
        element: row.try_get("element")?,
        severity: parse_text(row, "severity")?,
        tags: tags.into_iter().collect::<BTreeSet<_>>(),
        category: row.try_get("category")?,
        help: row.try_get("help")?,
        element_path: row.try_get("element_path")?,
        details: row.try_get("details")?,
        issue_hash: issue_hash.map(IssueHash::from_hex).transpose()?,
        first_seen_at: row.try_get("first_seen_at")?,
        last_seen_at: row.try_get("last_seen_at")?,
        occurrence_count: count(row.try_get("occurrence_count")?),
        is_resolved: row.try_get("is_resolved")?,
        resolved_at: row.try_get("resolved_at")?,
        resolved_in_scan_id: resolved_in.map(ScanId),
        owning_scan_id: ScanId(row.try_get("owning_scan_id")?),
    })
}

fn map_snapshot(row: &PgRow) -> Result<ProjectSnapshot> {
    Ok(ProjectSnapshot {
        project_id: ProjectId(row.try_get("project_id")?),
        total_issues: count(row.try_get("total_issues")?),
        critical_issues: count(row.try_get("critical_issues")?),
        high_issues: count(row.try_get("high_issues")?),
        medium_issues: count(row.try_get("medium_issues")?),
        low_issues: count(row.try_get("low_issues")?),
        info_issues: count(row.try_get("info_issues")?),
        last_scan_at: row.try_get("last_scan_at")?,
        status: parse_text(row, "status")?,
    })
}

fn map_finding(row: &PgRow) -> Result<ScanFindingRecord> {
    let hash: String = row.try_get("issue_hash")?;
    let finding: serde_json::Value = row.try_get("finding")?;
    Ok(ScanFindingRecord {
        scan_id: ScanId(row.try_get("scan_id")?),
        issue_id: IssueId(row.try_get("issue_id")?),
        issue_hash: IssueHash::from_hex(hash)?,
        finding: serde_json::from_value::<Finding>(finding)?,
        observed_at: row.try_get("observed_at")?,
    })
}

async fn write_scan(conn: &mut PgConnection, scan: &Scan) -> Result<()> {
    let diagnostics = scan
        .diagnostics
        .as_ref()
        .map(serde_json::to_value)
        .transpose()?;

    let result = sqlx::query(
        r#"
        UPDATE scans
        SET status = $2,
            started_at = $3,
            completed_at = $4,
            error_message = $5,
            config = $6,
            diagnostics = $7,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(scan.id.to_uuid())
    .bind(scan.status.as_str())
    .bind(scan.started_at)
    .bind(scan.completed_at)
    .bind(scan.error_message.as_deref())
    .bind(&scan.config)
    .bind(diagnostics)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AuditError::NotFound(format!("scan {}", scan.id)));
    }
    Ok(())
}

#[async_trait]
impl AuditStore for PostgresAuditStore {
    type Tx = PostgresTransaction;

    async fn begin(&self) -> Result<Self::Tx> {
        let tx = self.pool.begin().await?;
        Ok(PostgresTransaction { tx })
    }

    async fn insert_scan(&self, scan: &Scan) -> Result<()> {
        let diagnostics = scan
            .diagnostics
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        let result = sqlx::query(
            r#"
            INSERT INTO scans (
                id, project_id, url_id, url, scan_type, status,
                started_at, completed_at, error_message, config, diagnostics
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(scan.id.to_uuid())
        .bind(scan.project_id.to_uuid())
        .bind(scan.url_id.to_uuid())
        .bind(&scan.url)
        .bind(scan.scan_type.as_str())
        .bind(scan.status.as_str())
        .bind(scan.started_at)
        .bind(scan.completed_at)
        .bind(scan.error_message.as_deref())
        .bind(&scan.config)
        .bind(diagnostics)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AuditError::Conflict(format!(
                "scan {} already exists",
                scan.id
            )));
        }
        Ok(())
    }

    async fn get_scan(&self, id: ScanId) -> Result<Option<Scan>> {
        let query = format!("SELECT {SCAN_COLUMNS} FROM scans WHERE id = $1");
        sqlx::query(&query)
            .bind(id.to_uuid())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(map_scan)
            .transpose()
    }

    async fn list_scans(&self, project: ProjectId) -> Result<Vec<Scan>> {
        let query = format!(
            "SELECT {SCAN_COLUMNS} FROM scans WHERE project_id = $1 \
             ORDER BY started_at DESC, id"
        );
        let rows = sqlx::query(&query)
            .bind(project.to_uuid())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_scan).collect()
    }

    async fn mark_scan_running(&self, id: ScanId, at: DateTime<Utc>) -> Result<Scan> {
        self.modify_scan(id, |scan| Ok(scan.mark_running(at)?)).await
    }

    async fn restart_scan(
        &self,
        id: ScanId,
        config: serde_json::Value,
        at: DateTime<Utc>,
    ) -> Result<Scan> {
        let mut tx = self.pool.begin().await?;
        let query = format!("SELECT {SCAN_COLUMNS} FROM scans WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&query)
            .bind(id.to_uuid())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AuditError::NotFound(format!("scan {id}")))?;
        let mut scan = map_scan(&row)?;
        scan.restart(config, at)?;
        write_scan(&mut tx, &scan).await?;

        sqlx::query("DELETE FROM scan_findings WHERE scan_id = $1")
            .bind(id.to_uuid())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(scan)
    }

    async fn fail_scan(
        &self,
        id: ScanId,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scans
            SET status = 'failed',
                completed_at = $3,
                error_message = $2,
                updated_at = NOW()
            WHERE id = $1
              AND status IN ('pending', 'running')
            "#,
        )
        .bind(id.to_uuid())
        .bind(message)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn project_snapshot(
        &self,
        project: ProjectId,
    ) -> Result<Option<ProjectSnapshot>> {
        sqlx::query(
            r#"
            SELECT project_id, total_issues, critical_issues, high_issues,
                   medium_issues, low_issues, info_issues, last_scan_at, status
            FROM project_snapshots
            WHERE project_id = $1
            "#,
        )
        .bind(project.to_uuid())
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(map_snapshot)
        .transpose()
    }

    async fn list_issues(
        &self,
        project: ProjectId,
        include_resolved: bool,
    ) -> Result<Vec<Issue>> {
        let query = format!(
            "SELECT {ISSUE_COLUMNS} FROM issues \
             WHERE project_id = $1 AND ($2 OR NOT is_resolved) \
             ORDER BY CASE severity \
                 WHEN 'critical' THEN 0 WHEN 'high' THEN 1 WHEN 'medium' THEN 2 \
                 WHEN 'low' THEN 3 ELSE 4 END, \
             first_seen_at, id"
        );
        let rows = sqlx::query(&query)
            .bind(project.to_uuid())
            .bind(include_resolved)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_issue).collect()
    }

    async fn scan_findings(&self, scan: ScanId) -> Result<Vec<ScanFindingRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT scan_id, issue_id, issue_hash, finding, observed_at
            FROM scan_findings
            WHERE scan_id = $1
            ORDER BY id
            "#,
        )
        .bind(scan.to_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_finding).collect()
    }
}

/// Wraps one database transaction. Dropping it rolls back.
pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

impl fmt::Debug for PostgresTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresTransaction").finish_non_exhaustive()
    }
}

#[async_trait]
impl AuditTransaction for PostgresTransaction {
    async fn find_open_issue(
        &mut self,
        project: ProjectId,
        scan_type: ScanType,
        hash: &IssueHash,
    ) -> Result<Option<Issue>> {
        let query = format!(
            "SELECT {ISSUE_COLUMNS} FROM issues \
             WHERE project_id = $1 AND scan_type = $2 AND issue_hash = $3 \
               AND NOT is_resolved \
             FOR UPDATE"
        );
        sqlx::query(&query)
            .bind(project.to_uuid())
            .bind(scan_type.as_str())
            .bind(hash.as_str())
            .fetch_optional(&mut *self.tx)
            .await?
            .as_ref()
            .map(map_issue)
            .transpose()
    }

    async fn insert_issue(&mut self, issue: &Issue) -> Result<Issue> {
        let tags: Vec<&str> = issue.tags.iter().map(String::as_str).collect();
        let query = format!(
            r#"
            INSERT INTO issues (
                id, project_id, scan_type, url, url_id, message, element,
                severity, tags, category, help, element_path, details,
                issue_hash, first_seen_at, last_seen_at, occurrence_count,
                is_resolved, resolved_at, resolved_in_scan_id, owning_scan_id
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                $14, $15, $16, $17, FALSE, NULL, NULL, $18
            )
            ON CONFLICT (project_id, scan_type, issue_hash) WHERE NOT is_resolved
            DO UPDATE SET
                last_seen_at = GREATEST(issues.last_seen_at, EXCLUDED.last_seen_at),
                occurrence_count = issues.occurrence_count + 1,
                owning_scan_id = EXCLUDED.owning_scan_id
            RETURNING {ISSUE_COLUMNS}
            "#
        );

        let row = sqlx::query(&query)
            .bind(issue.id.to_uuid())
            .bind(issue.project_id.to_uuid())
            .bind(issue.scan_type.as_str())
            .bind(&issue.url)
            .bind(issue.url_id.to_uuid())
            .bind(&issue.message)
            .bind(issue.element.as_deref())
            .bind(issue.severity.as_str())
            .bind(&tags)
            .bind(&issue.category)
            .bind(issue.help.as_deref())
            .bind(issue.element_path.as_deref())
            .bind(issue.details.as_ref())
            .bind(issue.issue_hash.as_ref().map(IssueHash::as_str))
            .bind(issue.first_seen_at)
            .bind(issue.last_seen_at)
            .bind(i64::from(issue.occurrence_count))
            .bind(issue.owning_scan_id.to_uuid())
            .fetch_one(&mut *self.tx)
            .await?;

        map_issue(&row)
    }

    async fn update_issue(&mut self, issue: &Issue) -> Result<()> {
        let tags: Vec<&str> = issue.tags.iter().map(String::as_str).collect();
        let result = sqlx::query(
            r#"
            UPDATE issues
            SET severity = $2,
                tags = $3,
                category = $4,
                help = $5,
                element_path = $6,
                details = $7,
                last_seen_at = $8,
                occurrence_count = $9,
                owning_scan_id = $10
            WHERE id = $1
            "#,
        )
        .bind(issue.id.to_uuid())
        .bind(issue.severity.as_str())
        .bind(&tags)
        .bind(&issue.category)
        .bind(issue.help.as_deref())
        .bind(issue.element_path.as_deref())
        .bind(issue.details.as_ref())
        .bind(issue.last_seen_at)
        .bind(i64::from(issue.occurrence_count))
        .bind(issue.owning_scan_id.to_uuid())
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AuditError::NotFound(format!("issue {}", issue.id)));
        }
        Ok(())
    }

    async fn open_issues_for_target(
        &mut self,
        project: ProjectId,
        scan_type: ScanType,
        url_id: UrlId,
    ) -> Result<Vec<Issue>> {
        let query = format!(
            "SELECT {ISSUE_COLUMNS} FROM issues \
             WHERE project_id = $1 AND scan_type = $2 AND url_id = $3 \
               AND NOT is_resolved \
             FOR UPDATE"
        );
        let rows = sqlx::query(&query)
            .bind(project.to_uuid())
            .bind(scan_type.as_str())
            .bind(url_id.to_uuid())
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter().map(map_issue).collect()
    }

    async fn resolve_issue(
        &mut self,
        id: IssueId,
        scan: ScanId,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE issues
            SET is_resolved = TRUE,
                resolved_at = $3,
                resolved_in_scan_id = $2
            WHERE id = $1 AND NOT is_resolved
            "#,
        )
        .bind(id.to_uuid())
        .bind(scan.to_uuid())
        .bind(at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn has_prior_scan(
        &mut self,
        project: ProjectId,
        scan_type: ScanType,
        url_id: UrlId,
        excluding: ScanId,
    ) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM scans
                WHERE project_id = $1
                  AND scan_type = $2
                  AND url_id = $3
                  AND id <> $4
            )
            "#,
        )
        .bind(project.to_uuid())
        .bind(scan_type.as_str())
        .bind(url_id.to_uuid())
        .bind(excluding.to_uuid())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(exists)
    }

    async fn record_findings(&mut self, records: &[ScanFindingRecord]) -> Result<()> {
        for record in records {
            let finding = serde_json::to_value(&record.finding)?;
            sqlx::query(
                r#"
                INSERT INTO scan_findings (scan_id, issue_id, issue_hash, finding, observed_at)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(record.scan_id.to_uuid())
            .bind(record.issue_id.to_uuid())
            .bind(record.issue_hash.as_str())
            .bind(finding)
            .bind(record.observed_at)
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    async fn get_scan(&mut self, id: ScanId) -> Result<Option<Scan>> {
        let query = format!("SELECT {SCAN_COLUMNS} FROM scans WHERE id = $1 FOR UPDATE");
        sqlx::query(&query)
            .bind(id.to_uuid())
            .fetch_optional(&mut *self.tx)
            .await?
            .as_ref()
            .map(map_scan)
            .transpose()
    }

    async fn finish_scan(&mut self, scan: &Scan) -> Result<()> {
        write_scan(&mut self.tx, scan).await
    }

    async fn count_open_issues(&mut self, project: ProjectId) -> Result<SeverityCounts> {
        let rows = sqlx::query(
            r#"
            SELECT i.severity, COUNT(*) AS open_count
            FROM issues i
            JOIN scans s ON s.id = i.owning_scan_id
            WHERE i.project_id = $1
              AND NOT i.is_resolved
              AND s.status = 'completed'
            GROUP BY i.severity
            "#,
        )
        .bind(project.to_uuid())
        .fetch_all(&mut *self.tx)
        .await?;

        let mut counts = SeverityCounts::default();
        for row in &rows {
            let open: i64 = row.try_get("open_count")?;
            counts.add(parse_text(row, "severity")?, count(open));
        }
        Ok(counts)
    }

    async fn write_snapshot(&mut self, snapshot: &ProjectSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO project_snapshots (
                project_id, total_issues, critical_issues, high_issues,
                medium_issues, low_issues, info_issues, last_scan_at, status,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
            ON CONFLICT (project_id) DO UPDATE SET
                total_issues = EXCLUDED.total_issues,
                critical_issues = EXCLUDED.critical_issues,
                high_issues = EXCLUDED.high_issues,
                medium_issues = EXCLUDED.medium_issues,
                low_issues = EXCLUDED.low_issues,
                info_issues = EXCLUDED.info_issues,
                last_scan_at = EXCLUDED.last_scan_at,
                status = EXCLUDED.status,
                updated_at = NOW()
            "#,
        )
        .bind(snapshot.project_id.to_uuid())
        .bind(i64::from(snapshot.total_issues))
        .bind(i64::from(snapshot.critical_issues))
        .bind(i64::from(snapshot.high_issues))
        .bind(i64::from(snapshot.medium_issues))
        .bind(i64::from(snapshot.low_issues))
        .bind(i64::from(snapshot.info_issues))
        .bind(snapshot.last_scan_at)
        .bind(snapshot.status.as_str())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
