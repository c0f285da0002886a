#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sitewatch_core::{
    AnalyzerAdapter, AnalyzerError, AnalyzerRegistry, AnalyzerReport, AuditStore,
    OrchestratorConfig, ReachabilityProbe, ScanOrchestrator,
};
use sitewatch_model::{
    Finding, ProjectId, ReachabilityOutcome, ScanId, ScanStatus, ScanTriggerRequest,
    ScanType, ScanView,
};
use tokio::sync::{Notify, Semaphore};
use url::Url;

pub const TARGET: &str = "https://example.com/";

/// Analyzer whose answer the test can change between runs.
#[derive(Clone)]
pub struct ScriptedAnalyzer {
    name: &'static str,
    script: Arc<Mutex<Result<Vec<Finding>, String>>>,
}

impl ScriptedAnalyzer {
    pub fn new(name: &'static str, findings: Vec<Finding>) -> Self {
        Self {
            name,
            script: Arc::new(Mutex::new(Ok(findings))),
        }
    }

    pub fn report(&self, findings: Vec<Finding>) {
        *self.script.lock().expect("script lock") = Ok(findings);
    }

    pub fn fail_with(&self, message: &str) {
        *self.script.lock().expect("script lock") = Err(message.to_string());
    }
}

#[async_trait]
impl AnalyzerAdapter for ScriptedAnalyzer {
    fn name(&self) -> &str {
        self.name
    }

    async fn analyze(
        &self,
        _url: &Url,
        _options: &serde_json::Value,
    ) -> Result<AnalyzerReport, AnalyzerError> {
        let script = self.script.lock().expect("script lock").clone();
        script
            .map(AnalyzerReport::new)
            .map_err(AnalyzerError::Failed)
    }
}

pub struct FailingAnalyzer(pub &'static str);

#[async_trait]
impl AnalyzerAdapter for FailingAnalyzer {
    fn name(&self) -> &str {
        self.0
    }

    async fn analyze(
        &self,
        _url: &Url,
        _options: &serde_json::Value,
    ) -> Result<AnalyzerReport, AnalyzerError> {
        Err(AnalyzerError::Transport("connection reset".into()))
    }
}

pub struct PanickingAnalyzer;

#[async_trait]
impl AnalyzerAdapter for PanickingAnalyzer {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn analyze(
        &self,
        _url: &Url,
        _options: &serde_json::Value,
    ) -> Result<AnalyzerReport, AnalyzerError> {
        panic!("rule engine crashed");
    }
}

pub struct SlowAnalyzer(pub Duration);

#[async_trait]
impl AnalyzerAdapter for SlowAnalyzer {
    fn name(&self) -> &str {
        "slow"
    }

    async fn analyze(
        &self,
        _url: &Url,
        _options: &serde_json::Value,
    ) -> Result<AnalyzerReport, AnalyzerError> {
        tokio::time::sleep(self.0).await;
        Ok(AnalyzerReport::default())
    }
}

/// Blocks every call until the test opens the gate.
#[derive(Clone)]
pub struct GatedAnalyzer {
    gate: Arc<Semaphore>,
    entered: Arc<Notify>,
}

impl GatedAnalyzer {
    pub fn new() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(0)),
            entered: Arc::new(Notify::new()),
        }
    }

    pub async fn wait_entered(&self) {
        tokio::time::timeout(Duration::from_secs(5), self.entered.notified())
            .await
            .expect("analyzer was never called");
    }

    pub fn open(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }
}

#[async_trait]
impl AnalyzerAdapter for GatedAnalyzer {
    fn name(&self) -> &str {
        "gated"
    }

    async fn analyze(
        &self,
        _url: &Url,
        _options: &serde_json::Value,
    ) -> Result<AnalyzerReport, AnalyzerError> {
        self.entered.notify_one();
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|err| AnalyzerError::Failed(err.to_string()))?;
        Ok(AnalyzerReport::default())
    }
}

pub struct StubProbe(pub ReachabilityOutcome);

#[async_trait]
impl ReachabilityProbe for StubProbe {
    async fn probe(&self, _url: &Url) -> ReachabilityOutcome {
        self.0.clone()
    }
}

pub fn reachable() -> Arc<dyn ReachabilityProbe> {
    Arc::new(StubProbe(ReachabilityOutcome::Reachable { status: 200 }))
}

pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        workers: 2,
        queue_capacity: 16,
        reachability_timeout_ms: 1_000,
        adapter_timeout_ms: 1_000,
        scan_timeout_ms: 5_000,
        serialize_per_target: true,
    }
}

pub fn start<S: AuditStore>(
    store: Arc<S>,
    registry: AnalyzerRegistry,
    config: OrchestratorConfig,
) -> ScanOrchestrator<S> {
    ScanOrchestrator::start(config, store, registry, reachable())
}

pub fn scan_request(project: ProjectId, scan_type: ScanType) -> ScanTriggerRequest {
    ScanTriggerRequest {
        project_id: project,
        url: TARGET.to_string(),
        scan_type,
        options: serde_json::json!({ "depth": 1 }),
        scan_id: None,
    }
}

pub fn rescan_request(
    project: ProjectId,
    scan_type: ScanType,
    scan_id: ScanId,
) -> ScanTriggerRequest {
    ScanTriggerRequest {
        scan_id: Some(scan_id),
        ..scan_request(project, scan_type)
    }
}

pub async fn wait_terminal<S: AuditStore>(
    orchestrator: &ScanOrchestrator<S>,
    scan_id: ScanId,
) -> ScanView {
    for _ in 0..500 {
        let view = orchestrator
            .scan_status(scan_id)
            .await
            .expect("scan status");
        if view.status.is_terminal() {
            return view;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("scan {scan_id} did not reach a terminal state");
}

/// The snapshot counts exactly the open issues owned by completed scans.
pub async fn assert_snapshot_consistent<S: AuditStore>(store: &S, project: ProjectId) {
    let open = store.list_issues(project, false).await.expect("list issues");
    let mut expected = 0_u32;
    for issue in &open {
        let owner = store
            .get_scan(issue.owning_scan_id)
            .await
            .expect("owner lookup")
            .expect("owning scan exists");
        if owner.status == ScanStatus::Completed {
            expected += 1;
        }
    }

    let total = store
        .project_snapshot(project)
        .await
        .expect("snapshot lookup")
        .map_or(0, |snapshot| snapshot.total_issues);
    assert_eq!(
        total, expected,
        "snapshot total must equal open issues owned by completed scans"
    );
}
