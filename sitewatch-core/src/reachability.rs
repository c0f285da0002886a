//! Target validation and the bounded pre-flight reachability probe.

use std::time::Duration;

use async_trait::async_trait;
use sitewatch_model::ReachabilityOutcome;
use url::Url;

use crate::error::{AuditError, Result};

pub const DEFAULT_REACHABILITY_TIMEOUT: Duration = Duration::from_secs(10);

/// Parse and normalize a scan target.
///
/// Only targets that cannot be analyzed at all are rejected here; a target
/// that merely fails to answer is still scanned.
pub fn parse_target(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).map_err(|err| {
        AuditError::InvalidTarget(format!("{raw:?} is not a valid URL: {err}"))
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(AuditError::InvalidTarget(format!(
            "unsupported scheme {:?} in {raw:?}",
            url.scheme()
        )));
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(AuditError::InvalidTarget(format!(
            "{raw:?} has no host"
        )));
    }

    Ok(url)
}

/// Classify an HTTP status from the pre-flight request.
pub fn classify_status(status: u16) -> ReachabilityOutcome {
    match status {
        400..=499 => ReachabilityOutcome::ClientError { status },
        500..=599 => ReachabilityOutcome::ServerError { status },
        _ => ReachabilityOutcome::Reachable { status },
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// Never fails: transport problems are reported as
    /// [`ReachabilityOutcome::Unreachable`].
    async fn probe(&self, url: &Url) -> ReachabilityOutcome;
}

/// Issues a single GET against the target with a hard timeout.
#[derive(Debug, Clone)]
pub struct HttpReachabilityProbe {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpReachabilityProbe {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl ReachabilityProbe for HttpReachabilityProbe {
    async fn probe(&self, url: &Url) -> ReachabilityOutcome {
        let request = self.client.get(url.clone()).timeout(self.timeout).send();

        match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(response)) => classify_status(response.status().as_u16()),
            Ok(Err(err)) => ReachabilityOutcome::Unreachable {
                reason: err.to_string(),
            },
            Err(_) => ReachabilityOutcome::Unreachable {
                reason: format!("no response within {:?}", self.timeout),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_http_and_https_targets() {
        let url = parse_target("  https://example.com  ").expect("valid target");
        assert_eq!(url.as_str(), "https://example.com/");
        assert!(parse_target("http://localhost:8080/app").is_ok());
    }

    #[test]
    fn rejects_targets_that_cannot_be_analyzed() {
        assert!(matches!(
            parse_target("ftp://example.com"),
            Err(AuditError::InvalidTarget(_))
        ));
        assert!(matches!(
            parse_target("not a url"),
            Err(AuditError::InvalidTarget(_))
        ));
        assert!(matches!(
            parse_target("file:///etc/passwd"),
            Err(AuditError::InvalidTarget(_))
        ));
    }

    #[test]
    fn status_classes_map_to_outcomes() {
        assert_eq!(classify_status(200), ReachabilityOutcome::Reachable { status: 200 });
        assert_eq!(classify_status(301), ReachabilityOutcome::Reachable { status: 301 });
        assert_eq!(classify_status(404), ReachabilityOutcome::ClientError { status: 404 });
        assert_eq!(classify_status(503), ReachabilityOutcome::ServerError { status: 503 });
    }

    #[tokio::test]
    async fn unreachable_host_is_reported_not_raised() {
        let probe = HttpReachabilityProbe::new(
            reqwest::Client::new(),
            Duration::from_millis(500),
        );
        // Port 9 (discard) on localhost is closed in test environments.
        let url = Url::parse("http://127.0.0.1:9/").unwrap();
        let outcome = probe.probe(&url).await;
        assert!(matches!(outcome, ReachabilityOutcome::Unreachable { .. }));
    }
}
