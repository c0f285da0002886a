use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::ModelError;
use crate::ids::ProjectId;
use crate::severity::Severity;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ProjectStatus {
    #[default]
    Active,
    Warning,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Active => "active",
            ProjectStatus::Warning => "warning",
        }
    }
}

impl FromStr for ProjectStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(ProjectStatus::Active),
            "warning" => Ok(ProjectStatus::Warning),
            _ => Err(ModelError::Parse {
                kind: "project status",
                value: s.to_string(),
            }),
        }
    }
}

/// Unresolved issue counts grouped by severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SeverityCounts {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
    pub info: u32,
}

impl SeverityCounts {
    pub fn add(&mut self, severity: Severity, count: u32) {
        let slot = match severity {
            Severity::Critical => &mut self.critical,
            Severity::High => &mut self.high,
            Severity::Medium => &mut self.medium,
            Severity::Low => &mut self.low,
            Severity::Info => &mut self.info,
        };
        *slot = slot.saturating_add(count);
    }

    pub fn total(&self) -> u32 {
        self.critical + self.high + self.medium + self.low + self.info
    }
}

impl FromIterator<Severity> for SeverityCounts {
    fn from_iter<T: IntoIterator<Item = Severity>>(iter: T) -> Self {
        let mut counts = SeverityCounts::default();
        for severity in iter {
            counts.add(severity, 1);
        }
        counts
    }
}

/// Derived health summary of a project. Always rebuilt from open issues.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProjectSnapshot {
    pub project_id: ProjectId,
    pub total_issues: u32,
    pub critical_issues: u32,
    pub high_issues: u32,
    pub medium_issues: u32,
    pub low_issues: u32,
    pub info_issues: u32,
    pub last_scan_at: Option<DateTime<Utc>>,
    pub status: ProjectStatus,
}

impl ProjectSnapshot {
    /// Snapshot for a project that has never completed a scan.
    pub fn empty(project_id: ProjectId) -> Self {
        ProjectSnapshot::from_counts(project_id, SeverityCounts::default(), None)
    }

    pub fn from_counts(
        project_id: ProjectId,
        counts: SeverityCounts,
        last_scan_at: Option<DateTime<Utc>>,
    ) -> Self {
        let status = if counts.critical > 0 {
            ProjectStatus::Warning
        } else {
            ProjectStatus::Active
        };

        ProjectSnapshot {
            project_id,
            total_issues: counts.total(),
            critical_issues: counts.critical,
            high_issues: counts.high,
            medium_issues: counts.medium,
            low_issues: counts.low,
            info_issues: counts.info,
            last_scan_at,
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_issue_flips_status_to_warning() {
        let counts: SeverityCounts =
            [Severity::Critical, Severity::Low].into_iter().collect();
        let snapshot =
            ProjectSnapshot::from_counts(ProjectId::new(), counts, None);
        assert_eq!(snapshot.status, ProjectStatus::Warning);
        assert_eq!(snapshot.total_issues, 2);
    }

    #[test]
    fn info_counts_toward_total() {
        let counts: SeverityCounts =
            [Severity::Info, Severity::Info, Severity::High]
                .into_iter()
                .collect();
        let snapshot =
            ProjectSnapshot::from_counts(ProjectId::new(), counts, None);
        assert_eq!(snapshot.total_issues, 3);
        assert_eq!(snapshot.info_issues, 2);
        assert_eq!(snapshot.status, ProjectStatus::Active);
    }
}
