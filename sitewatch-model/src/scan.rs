use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::diagnostics::ScanDiagnostics;
use crate::error::{ModelError, Result};
use crate::ids::{ProjectId, ScanId, UrlId};

/// Kind of audit a scan performs. Each kind has its own analyzer chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ScanType {
    Accessibility,
    Security,
    #[cfg_attr(feature = "serde", serde(rename = "SEO", alias = "Seo"))]
    Seo,
    Performance,
    Uptime,
    #[cfg_attr(feature = "serde", serde(rename = "TLS", alias = "Tls"))]
    Tls,
}

impl ScanType {
    pub const ALL: [ScanType; 6] = [
        ScanType::Accessibility,
        ScanType::Security,
        ScanType::Seo,
        ScanType::Performance,
        ScanType::Uptime,
        ScanType::Tls,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanType::Accessibility => "accessibility",
            ScanType::Security => "security",
            ScanType::Seo => "seo",
            ScanType::Performance => "performance",
            ScanType::Uptime => "uptime",
            ScanType::Tls => "tls",
        }
    }
}

impl FromStr for ScanType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        ScanType::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ModelError::Parse {
                kind: "scan type",
                value: s.to_string(),
            })
    }
}

impl std::fmt::Display for ScanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a scan record.
///
/// `Pending -> Running -> {Completed, Failed}`. Terminal scans only move
/// again through [`ScanStatus::restart`], which is how rescans reuse an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ScanStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanStatus::Completed | ScanStatus::Failed)
    }

    pub fn can_transition_to(&self, next: ScanStatus) -> bool {
        matches!(
            (self, next),
            (ScanStatus::Pending, ScanStatus::Running)
                | (ScanStatus::Running, ScanStatus::Completed)
                | (ScanStatus::Running, ScanStatus::Failed)
        )
    }

    /// Validate a forward transition.
    pub fn transition(self, next: ScanStatus) -> Result<ScanStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(ModelError::InvalidTransition {
                from: self.as_str(),
                to: next.as_str(),
            })
        }
    }

    /// Rescan edge: a terminal scan goes straight back to `Running`.
    pub fn restart(self) -> Result<ScanStatus> {
        if self.is_terminal() {
            Ok(ScanStatus::Running)
        } else {
            Err(ModelError::InvalidTransition {
                from: self.as_str(),
                to: ScanStatus::Running.as_str(),
            })
        }
    }
}

impl FromStr for ScanStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(ScanStatus::Pending),
            "running" => Ok(ScanStatus::Running),
            "completed" => Ok(ScanStatus::Completed),
            "failed" => Ok(ScanStatus::Failed),
            _ => Err(ModelError::Parse {
                kind: "scan status",
                value: s.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit run of one URL for one scan type.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Scan {
    pub id: ScanId,
    pub project_id: ProjectId,
    pub url_id: UrlId,
    pub url: String,
    pub scan_type: ScanType,
    pub status: ScanStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// Analyzer options as supplied by the caller. Opaque to the core.
    pub config: serde_json::Value,
    /// Internal record of how the last run went. Not user facing.
    pub diagnostics: Option<ScanDiagnostics>,
}

impl Scan {
    pub fn new(
        project_id: ProjectId,
        url: impl Into<String>,
        scan_type: ScanType,
        config: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        let url = url.into();
        Scan {
            id: ScanId::new(),
            project_id,
            url_id: UrlId::derive(project_id, &url),
            url,
            scan_type,
            status: ScanStatus::Pending,
            started_at: now,
            completed_at: None,
            error_message: None,
            config,
            diagnostics: None,
        }
    }

    pub fn mark_running(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.status = self.status.transition(ScanStatus::Running)?;
        self.started_at = now;
        Ok(())
    }

    /// Reset a terminal scan for a rescan.
    pub fn restart(
        &mut self,
        config: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.status = self.status.restart()?;
        self.started_at = now;
        self.completed_at = None;
        self.error_message = None;
        self.diagnostics = None;
        self.config = config;
        Ok(())
    }

    pub fn complete(
        &mut self,
        now: DateTime<Utc>,
        diagnostics: ScanDiagnostics,
    ) -> Result<()> {
        self.status = self.status.transition(ScanStatus::Completed)?;
        self.completed_at = Some(now);
        self.error_message = None;
        self.diagnostics = Some(diagnostics);
        Ok(())
    }

    pub fn fail(
        &mut self,
        now: DateTime<Utc>,
        message: impl Into<String>,
        diagnostics: Option<ScanDiagnostics>,
    ) -> Result<()> {
        self.status = self.status.transition(ScanStatus::Failed)?;
        self.completed_at = Some(now);
        self.error_message = Some(message.into());
        if diagnostics.is_some() {
            self.diagnostics = diagnostics;
        }
        Ok(())
    }
}

/// Request accepted by the scan trigger interface. The trigger payloads
/// use camelCase on the wire.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct ScanTriggerRequest {
    pub project_id: ProjectId,
    pub url: String,
    pub scan_type: ScanType,
    #[cfg_attr(feature = "serde", serde(default))]
    pub options: serde_json::Value,
    /// When present the existing scan is re-run under the same id.
    #[cfg_attr(feature = "serde", serde(default))]
    pub scan_id: Option<ScanId>,
}

/// Immediate response to a trigger request.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct ScanAccepted {
    pub scan_id: ScanId,
    pub status: ScanStatus,
}

/// Caller-facing view used for status polling.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct ScanView {
    pub scan_id: ScanId,
    pub project_id: ProjectId,
    pub url: String,
    pub scan_type: ScanType,
    pub status: ScanStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[cfg_attr(
        feature = "serde",
        serde(skip_serializing_if = "Option::is_none")
    )]
    pub error_message: Option<String>,
}

impl From<&Scan> for ScanView {
    fn from(scan: &Scan) -> Self {
        ScanView {
            scan_id: scan.id,
            project_id: scan.project_id,
            url: scan.url.clone(),
            scan_type: scan.scan_type,
            status: scan.status,
            started_at: scan.started_at,
            completed_at: scan.completed_at,
            error_message: match scan.status {
                ScanStatus::Failed => scan.error_message.clone(),
                _ => None,
            },
        }
    }
}
