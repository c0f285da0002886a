use crate::issue::ScanDelta;

/// Result of the bounded pre-flight request against a scan target.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
pub enum ReachabilityOutcome {
    Reachable { status: u16 },
    /// 4xx: analysis continues with a warning.
    ClientError { status: u16 },
    /// 5xx: recorded, analysis is still attempted.
    ServerError { status: u16 },
    /// Network failure or timeout before any response arrived.
    Unreachable { reason: String },
}

impl ReachabilityOutcome {
    pub fn is_reachable(&self) -> bool {
        matches!(self, ReachabilityOutcome::Reachable { .. })
    }

    /// Plain-text cause when the target could not be reached at all.
    pub fn failure_reason(&self) -> Option<String> {
        match self {
            ReachabilityOutcome::Unreachable { reason } => {
                Some(format!("target unreachable: {reason}"))
            }
            ReachabilityOutcome::ServerError { status } => {
                Some(format!("target returned HTTP {status}"))
            }
            _ => None,
        }
    }
}

/// One analyzer invocation inside a fallback chain.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AdapterAttempt {
    pub analyzer: String,
    pub elapsed_ms: u64,
    #[cfg_attr(
        feature = "serde",
        serde(default, skip_serializing_if = "Option::is_none")
    )]
    pub error: Option<String>,
}

impl AdapterAttempt {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Internal account of a scan run: degradation shows up here and in logs,
/// never as a failed status.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanDiagnostics {
    pub reachability: Option<ReachabilityOutcome>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub attempts: Vec<AdapterAttempt>,
    /// Analyzer whose findings were used, if any succeeded.
    pub analyzer: Option<String>,
    pub delta: Option<ScanDelta>,
    /// Coarse summary reported by the analyzer that succeeded.
    #[cfg_attr(feature = "serde", serde(default))]
    pub summary: serde_json::Value,
}

impl ScanDiagnostics {
    /// True when the result came from a fallback adapter or the target
    /// was not cleanly reachable.
    pub fn is_degraded(&self) -> bool {
        let fallback_used = self.attempts.iter().any(|a| !a.succeeded());
        let unreachable = self
            .reachability
            .as_ref()
            .is_some_and(|outcome| !outcome.is_reachable());
        fallback_used || unreachable
    }
}
