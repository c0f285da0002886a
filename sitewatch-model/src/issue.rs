use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::error::{ModelError, Result};
use crate::finding::Finding;
use crate::ids::{IssueId, ProjectId, ScanId, UrlId};
use crate::scan::ScanType;
use crate::severity::Severity;

/// Content-derived identity of an issue: 64 lowercase hex characters of a
/// SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub struct IssueHash(String);

impl IssueHash {
    pub const HEX_LEN: usize = 64;

    pub fn from_digest(digest: &[u8; 32]) -> Self {
        use std::fmt::Write;

        let mut hex = String::with_capacity(Self::HEX_LEN);
        for byte in digest {
            let _ = write!(hex, "{byte:02x}");
        }
        IssueHash(hex)
    }

    pub fn from_hex(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let valid = value.len() == Self::HEX_LEN
            && value
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if valid {
            Ok(IssueHash(value))
        } else {
            Err(ModelError::InvalidHash(value))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for IssueHash {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self> {
        IssueHash::from_hex(value)
    }
}

impl From<IssueHash> for String {
    fn from(value: IssueHash) -> Self {
        value.0
    }
}

impl std::fmt::Display for IssueHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deduplicated, cross-scan record of a problem.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Issue {
    pub id: IssueId,
    pub project_id: ProjectId,
    pub scan_type: ScanType,
    /// URL reported by the finding (usually the target itself).
    pub url: String,
    /// Scan target this issue belongs to; resolution is scoped by it.
    pub url_id: UrlId,
    pub message: String,
    pub element: Option<String>,
    pub severity: Severity,
    pub tags: BTreeSet<String>,
    pub category: String,
    pub help: Option<String>,
    pub element_path: Option<String>,
    pub details: Option<serde_json::Value>,
    /// `None` only for rows written before hashing existed.
    pub issue_hash: Option<IssueHash>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub occurrence_count: u32,
    pub is_resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_in_scan_id: Option<ScanId>,
    pub owning_scan_id: ScanId,
}

impl Issue {
    pub fn is_open(&self) -> bool {
        !self.is_resolved
    }
}

/// Raw observation of a finding attached to the scan that produced it.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanFindingRecord {
    pub scan_id: ScanId,
    pub issue_id: IssueId,
    pub issue_hash: IssueHash,
    pub finding: Finding,
    pub observed_at: DateTime<Utc>,
}

/// What one scan changed in the issue set of its target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanDelta {
    pub created: Vec<IssueId>,
    pub recurring: Vec<IssueId>,
    pub resolved: Vec<IssueId>,
}

impl ScanDelta {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
            && self.recurring.is_empty()
            && self.resolved.is_empty()
    }
}

impl std::fmt::Display for ScanDelta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} new, {} recurring, {} resolved",
            self.created.len(),
            self.recurring.len(),
            self.resolved.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_hash_accepts_only_lower_hex_digest() {
        let good = "a".repeat(64);
        assert!(IssueHash::from_hex(good).is_ok());
        assert!(IssueHash::from_hex("A".repeat(64)).is_err());
        assert!(IssueHash::from_hex("abc").is_err());
        assert!(IssueHash::from_hex("g".repeat(64)).is_err());
    }

    #[test]
    fn delta_renders_counts() {
        let delta = ScanDelta {
            created: vec![IssueId::new(), IssueId::new(), IssueId::new()],
            recurring: vec![],
            resolved: vec![IssueId::new(), IssueId::new()],
        };
        assert_eq!(delta.to_string(), "3 new, 0 recurring, 2 resolved");
    }
}
