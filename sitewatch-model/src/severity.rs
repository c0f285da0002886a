use std::str::FromStr;

use crate::error::ModelError;

/// Closed severity scale shared by every analyzer.
///
/// Ordering runs from least to most severe so `max()` picks the worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Info,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        }
    }

    /// Map an analyzer-specific severity spelling onto the closed scale.
    ///
    /// Unknown labels map to [`Severity::Info`].
    pub fn from_analyzer_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "critical" | "blocker" | "fatal" => Severity::Critical,
            "high" | "serious" | "error" | "major" => Severity::High,
            "medium" | "moderate" | "warning" | "warn" => Severity::Medium,
            "low" | "minor" | "notice" => Severity::Low,
            _ => Severity::Info,
        }
    }
}

impl FromStr for Severity {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Severity::ALL
            .into_iter()
            .find(|severity| severity.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ModelError::Parse {
                kind: "severity",
                value: s.to_string(),
            })
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analyzer_labels_map_onto_closed_scale() {
        assert_eq!(Severity::from_analyzer_label("Serious"), Severity::High);
        assert_eq!(Severity::from_analyzer_label("moderate"), Severity::Medium);
        assert_eq!(Severity::from_analyzer_label(" minor "), Severity::Low);
        assert_eq!(Severity::from_analyzer_label("blocker"), Severity::Critical);
        assert_eq!(Severity::from_analyzer_label("cosmetic"), Severity::Info);
    }

    #[test]
    fn strict_parse_rejects_foreign_labels() {
        assert_eq!("HIGH".parse::<Severity>(), Ok(Severity::High));
        assert!("serious".parse::<Severity>().is_err());
    }

    #[test]
    fn ordering_puts_critical_last() {
        assert!(Severity::Critical > Severity::High);
        assert_eq!(Severity::ALL.iter().max(), Some(&Severity::Critical));
    }
}
