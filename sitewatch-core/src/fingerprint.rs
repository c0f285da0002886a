//! Content-based issue identity.
//!
//! An issue is identified by the URL it was reported on, its message, the
//! offending element and the scan type. Tags, help text, details and
//! severity are descriptive and may change between observations without
//! breaking identity.

use sha2::{Digest, Sha256};
use sitewatch_model::{Finding, IssueHash, ScanType};

const ELEMENT_ABSENT: u8 = 0;
const ELEMENT_PRESENT: u8 = 1;

/// Compute the identity hash for an issue.
///
/// Every field is written length-prefixed, so no two distinct inputs share
/// an encoding (`("ab", "c")` vs `("a", "bc")`), and a missing element is
/// distinct from an empty one.
pub fn issue_hash(
    url: &str,
    message: &str,
    element: Option<&str>,
    scan_type: ScanType,
) -> IssueHash {
    let mut hasher = Sha256::new();
    write_field(&mut hasher, url.as_bytes());
    write_field(&mut hasher, message.as_bytes());
    match element {
        Some(element) => {
            hasher.update([ELEMENT_PRESENT]);
            write_field(&mut hasher, element.as_bytes());
        }
        None => hasher.update([ELEMENT_ABSENT]),
    }
    write_field(&mut hasher, scan_type.as_str().as_bytes());

    let digest: [u8; 32] = hasher.finalize().into();
    IssueHash::from_digest(&digest)
}

/// Identity hash of a finding observed by a scan of `scan_type`.
pub fn finding_hash(finding: &Finding, scan_type: ScanType) -> IssueHash {
    issue_hash(
        &finding.url,
        &finding.message,
        finding.element.as_deref(),
        scan_type,
    )
}

fn write_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitewatch_model::Severity;

    const URL: &str = "https://example.com/";

    #[test]
    fn identical_inputs_hash_identically() {
        let a = issue_hash(URL, "img missing alt", Some("<img>"), ScanType::Accessibility);
        let b = issue_hash(URL, "img missing alt", Some("<img>"), ScanType::Accessibility);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), IssueHash::HEX_LEN);
    }

    #[test]
    fn each_identity_field_changes_the_hash() {
        let base = issue_hash(URL, "msg", Some("<a>"), ScanType::Seo);
        assert_ne!(base, issue_hash("https://example.org/", "msg", Some("<a>"), ScanType::Seo));
        assert_ne!(base, issue_hash(URL, "other", Some("<a>"), ScanType::Seo));
        assert_ne!(base, issue_hash(URL, "msg", Some("<b>"), ScanType::Seo));
        assert_ne!(base, issue_hash(URL, "msg", Some("<a>"), ScanType::Security));
    }

    #[test]
    fn field_boundaries_are_unambiguous() {
        let left = issue_hash("ab", "c", None, ScanType::Seo);
        let right = issue_hash("a", "bc", None, ScanType::Seo);
        assert_ne!(left, right);

        let missing = issue_hash(URL, "msg", None, ScanType::Seo);
        let empty = issue_hash(URL, "msg", Some(""), ScanType::Seo);
        assert_ne!(missing, empty);
    }

    #[test]
    fn descriptive_fields_do_not_affect_identity() {
        let plain = Finding::new(URL, "img missing alt", Severity::High)
            .with_element("<img>");
        let refined = plain
            .clone()
            .with_tags(["wcag2a", "images"])
            .with_help("Images need alternative text")
            .with_details(serde_json::json!({"rule": "image-alt"}))
            .with_element_path("html > body > img");
        let mut reseverity = refined.clone();
        reseverity.severity = Severity::Critical;

        let expected = finding_hash(&plain, ScanType::Accessibility);
        assert_eq!(expected, finding_hash(&refined, ScanType::Accessibility));
        assert_eq!(expected, finding_hash(&reseverity, ScanType::Accessibility));
    }
}
