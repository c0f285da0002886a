use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sitewatch_model::{Finding, Severity};
use tracing::debug;
use url::Url;

use super::{AnalyzerAdapter, AnalyzerError, AnalyzerReport};

/// Adapter that delegates detection to an external analyzer service.
///
/// The service receives `{"url": ..., "options": ...}` and answers with
/// `{"findings": [...], "summary": ...}`. Severity labels are normalized
/// here, at the boundary.
#[derive(Clone)]
pub struct RemoteAnalyzer {
    name: String,
    endpoint: Url,
    client: reqwest::Client,
}

impl fmt::Debug for RemoteAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteAnalyzer")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint.as_str())
            .finish()
    }
}

impl RemoteAnalyzer {
    pub fn new(name: String, endpoint: Url, client: reqwest::Client) -> Self {
        Self {
            name,
            endpoint,
            client,
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    url: &'a str,
    options: &'a serde_json::Value,
}

#[derive(Deserialize)]
struct WireReport {
    #[serde(default)]
    findings: Vec<WireFinding>,
    #[serde(default)]
    summary: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFinding {
    #[serde(default)]
    url: Option<String>,
    message: String,
    #[serde(default)]
    element: Option<String>,
    #[serde(default, alias = "impact", alias = "level")]
    severity: Option<String>,
    #[serde(default)]
    help: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default, alias = "element_path")]
    element_path: Option<String>,
    #[serde(default)]
    details: Option<serde_json::Value>,
    #[serde(default)]
    category: Option<String>,
}

impl From<WireFinding> for Finding {
    fn from(wire: WireFinding) -> Self {
        let severity = wire
            .severity
            .as_deref()
            .map(Severity::from_analyzer_label)
            .unwrap_or(Severity::Info);

        Finding {
            url: wire.url.unwrap_or_default(),
            message: wire.message,
            element: wire.element,
            severity,
            help: wire.help,
            tags: wire.tags,
            element_path: wire.element_path,
            details: wire.details,
            category: wire.category,
        }
    }
}

pub(crate) fn decode_report(body: &[u8]) -> Result<AnalyzerReport, AnalyzerError> {
    let wire: WireReport = serde_json::from_slice(body)
        .map_err(|err| AnalyzerError::InvalidResponse(err.to_string()))?;

    Ok(AnalyzerReport {
        findings: wire.findings.into_iter().map(Finding::from).collect(),
        summary: wire.summary,
    })
}

#[async_trait]
impl AnalyzerAdapter for RemoteAnalyzer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(
        &self,
        url: &Url,
        options: &serde_json::Value,
    ) -> Result<AnalyzerReport, AnalyzerError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&AnalyzeRequest {
                url: url.as_str(),
                options,
            })
            .send()
            .await
            .map_err(|err| AnalyzerError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AnalyzerError::Status(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| AnalyzerError::Transport(err.to_string()))?;
        let report = decode_report(&body)?;

        debug!(
            target: "scan::analyzer",
            analyzer = %self.name,
            findings = report.findings.len(),
            "remote analyzer responded"
        );
        Ok(report)
    }
}
