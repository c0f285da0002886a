use std::any::{Any, type_name};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use sitewatch_model::{
    AdapterAttempt, Issue, ModelError, ProjectId, ProjectSnapshot, ReachabilityOutcome,
    Scan, ScanAccepted, ScanDiagnostics, ScanId, ScanTriggerRequest, ScanType, ScanView,
    UrlId,
};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use super::config::OrchestratorConfig;
use super::locks::{TargetKey, TargetQueues};
use crate::analyzer::{AnalyzerAdapter, AnalyzerError, AnalyzerRegistry, AnalyzerReport};
use crate::coordinator::{AnalysisOutcome, ScanCommit, TransactionCoordinator};
use crate::error::{AuditError, Result};
use crate::persistence::AuditStore;
use crate::reachability::{ReachabilityProbe, parse_target};

const SHUTDOWN_BEFORE_START: &str = "scan orchestrator shut down before the scan started";

/// A scan accepted by [`ScanOrchestrator::start_scan`] and waiting for a
/// worker.
#[derive(Debug, Clone)]
struct ScanTask {
    scan_id: ScanId,
    project_id: ProjectId,
    scan_type: ScanType,
    url_id: UrlId,
    url: Url,
    options: serde_json::Value,
    is_rescan: bool,
}

impl ScanTask {
    fn target(&self) -> TargetKey {
        TargetKey {
            project_id: self.project_id,
            scan_type: self.scan_type,
            url_id: self.url_id,
        }
    }
}

/// State shared by every worker.
struct ScanExecutor<S: AuditStore> {
    config: OrchestratorConfig,
    store: Arc<S>,
    registry: AnalyzerRegistry,
    probe: Arc<dyn ReachabilityProbe>,
    coordinator: TransactionCoordinator<S>,
    targets: TargetQueues<ScanTask>,
}

/// Accepts scan requests and runs them on a bounded worker pool.
///
/// `start_scan` only writes the scan row and enqueues; analysis, issue
/// reconciliation and the snapshot update happen on a worker. Callers
/// follow progress through [`scan_status`](Self::scan_status).
pub struct ScanOrchestrator<S: AuditStore> {
    executor: Arc<ScanExecutor<S>>,
    sender: Mutex<Option<mpsc::Sender<ScanTask>>>,
    receiver: Arc<Mutex<mpsc::Receiver<ScanTask>>>,
    shutdown_token: CancellationToken,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<S: AuditStore> fmt::Debug for ScanOrchestrator<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let worker_count = self
            .worker_handles
            .try_lock()
            .map(|handles| handles.len())
            .unwrap_or_default();

        f.debug_struct("ScanOrchestrator")
            .field("config", &self.executor.config)
            .field("store_type", &type_name::<S>())
            .field("registry", &self.executor.registry)
            .field("worker_count", &worker_count)
            .field("shutdown_cancelled", &self.shutdown_token.is_cancelled())
            .finish()
    }
}

impl<S: AuditStore> ScanOrchestrator<S> {
    /// Build the orchestrator and spawn its workers on the current runtime.
    pub fn start(
        config: OrchestratorConfig,
        store: Arc<S>,
        registry: AnalyzerRegistry,
        probe: Arc<dyn ReachabilityProbe>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let shutdown_token = CancellationToken::new();
        let workers = config.workers.max(1);

        let executor = Arc::new(ScanExecutor {
            coordinator: TransactionCoordinator::new(Arc::clone(&store)),
            config,
            store,
            registry,
            probe,
            targets: TargetQueues::new(),
        });

        let handles = (0..workers)
            .map(|index| {
                let executor = Arc::clone(&executor);
                let receiver = Arc::clone(&receiver);
                let shutdown = shutdown_token.clone();
                tokio::spawn(async move {
                    loop {
                        let next = tokio::select! {
                            biased;
                            _ = shutdown.cancelled() => None,
                            task = async { receiver.lock().await.recv().await } => task,
                        };
                        let Some(task) = next else { break };
                        executor.process(task, &shutdown).await;
                    }
                    debug!(target: "scan::orchestrator", worker = index, "scan worker stopped");
                })
            })
            .collect();

        info!(
            target: "scan::orchestrator",
            workers,
            queue_capacity = executor.config.queue_capacity,
            "scan orchestrator started"
        );

        Self {
            executor,
            sender: Mutex::new(Some(sender)),
            receiver,
            shutdown_token,
            worker_handles: Mutex::new(handles),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.executor.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.executor.store
    }

    /// Accept a scan or a rescan and return without waiting for analysis.
    pub async fn start_scan(&self, request: ScanTriggerRequest) -> Result<ScanAccepted> {
        let url = parse_target(&request.url)?;
        if self.shutdown_token.is_cancelled() {
            return Err(AuditError::ShuttingDown);
        }

        let now = Utc::now();
        let store = &self.executor.store;
        let (scan, is_rescan) = match request.scan_id {
            Some(scan_id) => {
                let existing = store
                    .get_scan(scan_id)
                    .await?
                    .ok_or_else(|| AuditError::NotFound(format!("scan {scan_id}")))?;
                check_rescan(&existing, &request, &url)?;
                let scan = store
                    .restart_scan(scan_id, request.options.clone(), now)
                    .await
                    .map_err(|err| match err {
                        AuditError::Model(ModelError::InvalidTransition { from, .. }) => {
                            AuditError::Conflict(format!("scan {scan_id} is still {from}"))
                        }
                        other => other,
                    })?;
                (scan, true)
            }
            None => {
                let scan = Scan::new(
                    request.project_id,
                    url.as_str(),
                    request.scan_type,
                    request.options.clone(),
                    now,
                );
                store.insert_scan(&scan).await?;
                (store.mark_scan_running(scan.id, now).await?, false)
            }
        };

        let task = ScanTask {
            scan_id: scan.id,
            project_id: scan.project_id,
            scan_type: scan.scan_type,
            url_id: scan.url_id,
            url,
            options: request.options,
            is_rescan,
        };
        self.enqueue(task).await?;

        info!(
            target: "scan::orchestrator",
            scan_id = %scan.id,
            project_id = %scan.project_id,
            scan_type = scan.scan_type.as_str(),
            url = %scan.url,
            rescan = is_rescan,
            "scan accepted"
        );
        Ok(ScanAccepted {
            scan_id: scan.id,
            status: scan.status,
        })
    }

    async fn enqueue(&self, task: ScanTask) -> Result<()> {
        let scan_id = task.scan_id;
        let sender = self.sender.lock().await.clone();
        // Scans parked behind a busy target count against the queue too.
        let parked = self.executor.targets.parked_total();
        let refused = match sender {
            None => AuditError::ShuttingDown,
            Some(_) if parked >= self.executor.config.queue_capacity.max(1) => {
                AuditError::QueueFull
            }
            Some(sender) => match sender.try_send(task) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::TrySendError::Full(_)) => AuditError::QueueFull,
                Err(mpsc::error::TrySendError::Closed(_)) => AuditError::ShuttingDown,
            },
        };

        let message = match refused {
            AuditError::QueueFull => "scan queue is full",
            _ => "scan orchestrator is shutting down",
        };
        warn!(target: "scan::orchestrator", %scan_id, reason = message, "scan refused");
        self.executor.fail(scan_id, message).await;
        Err(refused)
    }

    pub async fn scan_status(&self, scan_id: ScanId) -> Result<ScanView> {
        self.executor
            .store
            .get_scan(scan_id)
            .await?
            .map(|scan| ScanView::from(&scan))
            .ok_or_else(|| AuditError::NotFound(format!("scan {scan_id}")))
    }

    pub async fn project_scans(&self, project: ProjectId) -> Result<Vec<ScanView>> {
        let scans = self.executor.store.list_scans(project).await?;
        Ok(scans.iter().map(ScanView::from).collect())
    }

    /// Current snapshot; a project that never completed a scan reads as
    /// empty.
    pub async fn project_snapshot(&self, project: ProjectId) -> Result<ProjectSnapshot> {
        Ok(self
            .executor
            .store
            .project_snapshot(project)
            .await?
            .unwrap_or_else(|| ProjectSnapshot::empty(project)))
    }

    pub async fn open_issues(&self, project: ProjectId) -> Result<Vec<Issue>> {
        self.executor.store.list_issues(project, false).await
    }

    pub async fn issues(&self, project: ProjectId, include_resolved: bool) -> Result<Vec<Issue>> {
        self.executor.store.list_issues(project, include_resolved).await
    }

    /// Stop accepting scans, let running scans finish and fail whatever is
    /// still queued.
    pub async fn shutdown(&self) {
        info!(target: "scan::orchestrator", "shutting down scan orchestrator");
        self.shutdown_token.cancel();
        self.sender.lock().await.take();

        let handles = {
            let mut guard = self.worker_handles.lock().await;
            std::mem::take(&mut *guard)
        };
        let grace = self.executor.config.scan_timeout();
        for handle in handles {
            match tokio::time::timeout(grace, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(target: "scan::orchestrator", error = %err, "scan worker ended abnormally")
                }
                Err(_) => warn!(target: "scan::orchestrator", "scan worker did not stop in time"),
            }
        }

        let mut receiver = self.receiver.lock().await;
        receiver.close();
        while let Ok(task) = receiver.try_recv() {
            self.executor
                .fail(task.scan_id, SHUTDOWN_BEFORE_START)
                .await;
        }
    }
}

fn check_rescan(existing: &Scan, request: &ScanTriggerRequest, url: &Url) -> Result<()> {
    if !existing.status.is_terminal() {
        return Err(AuditError::Conflict(format!(
            "scan {} is still {}",
            existing.id, existing.status
        )));
    }
    if existing.project_id != request.project_id
        || existing.scan_type != request.scan_type
        || existing.url != url.as_str()
    {
        return Err(AuditError::Conflict(format!(
            "scan {} belongs to a different target",
            existing.id
        )));
    }
    Ok(())
}

impl<S: AuditStore> ScanExecutor<S> {
    /// Run a dequeued scan. With per-target serialization a scan whose
    /// target is busy is parked behind it and this worker moves on; the
    /// worker owning the target runs parked scans one after another.
    async fn process(self: &Arc<Self>, task: ScanTask, shutdown: &CancellationToken) {
        if !self.config.serialize_per_target {
            self.supervise(task).await;
            return;
        }

        let key = task.target();
        let Some(task) = self.targets.claim(key, task) else {
            debug!(target: "scan::orchestrator", target_key = ?key, "target busy; scan parked");
            return;
        };
        self.supervise(task).await;

        while let Some(parked) = self.targets.release(key) {
            if shutdown.is_cancelled() {
                self.fail(parked.scan_id, SHUTDOWN_BEFORE_START).await;
            } else {
                self.supervise(parked).await;
            }
        }
    }

    /// Run one scan in its own task under the scan budget. Whatever
    /// happens, the scan ends terminal.
    async fn supervise(self: &Arc<Self>, task: ScanTask) {
        let scan_id = task.scan_id;
        let budget = self.config.scan_timeout();
        let executor = Arc::clone(self);
        let mut handle = tokio::spawn(async move { executor.run(task).await });

        match tokio::time::timeout(budget, &mut handle).await {
            Ok(Ok(Ok(commit))) => debug!(
                target: "scan::orchestrator",
                %scan_id,
                status = commit.status.as_str(),
                "scan finished"
            ),
            Ok(Ok(Err(err))) => {
                // The coordinator has already failed the scan when it got
                // that far; this covers errors before it.
                self.fail(scan_id, &err.to_string()).await;
            }
            Ok(Err(join_err)) => {
                let message = if join_err.is_panic() {
                    format!("scan aborted: {}", panic_message(join_err.into_panic().as_ref()))
                } else {
                    "scan task was cancelled".to_string()
                };
                error!(target: "scan::orchestrator", %scan_id, %message, "scan task died");
                self.fail(scan_id, &message).await;
            }
            Err(_) => {
                handle.abort();
                let message = format!("scan exceeded its time budget of {budget:?}");
                error!(target: "scan::orchestrator", %scan_id, %message, "scan timed out");
                self.fail(scan_id, &message).await;
            }
        }
    }

    async fn run(&self, task: ScanTask) -> Result<ScanCommit> {
        let reachability = self.check_reachability(&task).await;
        let reachability_failure = reachability.failure_reason();
        let diagnostics = ScanDiagnostics {
            reachability: Some(reachability),
            ..ScanDiagnostics::default()
        };

        let outcome = self
            .analyze(&task, diagnostics, reachability_failure)
            .await;
        self.coordinator
            .finalize(task.scan_id, task.is_rescan, outcome)
            .await
    }

    async fn check_reachability(&self, task: &ScanTask) -> ReachabilityOutcome {
        let timeout = self.config.reachability_timeout();
        let outcome = match tokio::time::timeout(timeout, self.probe.probe(&task.url)).await {
            Ok(outcome) => outcome,
            Err(_) => ReachabilityOutcome::Unreachable {
                reason: format!("no response within {timeout:?}"),
            },
        };

        match &outcome {
            ReachabilityOutcome::Reachable { status } => debug!(
                target: "scan::reachability",
                scan_id = %task.scan_id,
                status,
                "target reachable"
            ),
            ReachabilityOutcome::ClientError { status } => warn!(
                target: "scan::reachability",
                scan_id = %task.scan_id,
                status,
                "target answered with a client error; analyzing anyway"
            ),
            ReachabilityOutcome::ServerError { .. } | ReachabilityOutcome::Unreachable { .. } => {
                warn!(
                    target: "scan::reachability",
                    scan_id = %task.scan_id,
                    outcome = ?outcome,
                    "target not cleanly reachable; analysis still attempted"
                )
            }
        }
        outcome
    }

    /// Walk the fallback chain until one analyzer succeeds.
    async fn analyze(
        &self,
        task: &ScanTask,
        mut diagnostics: ScanDiagnostics,
        reachability_failure: Option<String>,
    ) -> AnalysisOutcome {
        let chain = self.registry.chain(task.scan_type);
        if chain.is_empty() {
            return AnalysisOutcome::failed(
                format!("no analyzer registered for {} scans", task.scan_type),
                diagnostics,
            );
        }

        let mut first_error: Option<(String, AnalyzerError)> = None;
        for adapter in chain {
            let name = adapter.name().to_string();
            let started = Instant::now();
            let result = self.invoke(adapter.as_ref(), task).await;
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            match result {
                Ok(report) => {
                    if first_error.is_some() {
                        info!(
                            target: "scan::analyzer",
                            scan_id = %task.scan_id,
                            analyzer = %name,
                            "fallback analyzer succeeded"
                        );
                    }
                    diagnostics.attempts.push(AdapterAttempt {
                        analyzer: name.clone(),
                        elapsed_ms,
                        error: None,
                    });
                    diagnostics.analyzer = Some(name);
                    diagnostics.summary = report.summary;
                    return AnalysisOutcome::completed(report.findings, diagnostics);
                }
                Err(err) => {
                    warn!(
                        target: "scan::analyzer",
                        scan_id = %task.scan_id,
                        analyzer = %name,
                        error = %err,
                        elapsed_ms,
                        "analyzer failed"
                    );
                    diagnostics.attempts.push(AdapterAttempt {
                        analyzer: name.clone(),
                        elapsed_ms,
                        error: Some(err.to_string()),
                    });
                    first_error.get_or_insert((name, err));
                }
            }
        }

        let message = match (reachability_failure, first_error) {
            (Some(reason), _) => reason,
            (None, Some((name, err))) => format!(
                "all {} analyzers failed for {} scan; first error from {name}: {err}",
                chain.len(),
                task.scan_type
            ),
            (None, None) => format!("analysis failed for {} scan", task.scan_type),
        };
        AnalysisOutcome::failed(message, diagnostics)
    }

    async fn invoke(
        &self,
        adapter: &dyn AnalyzerAdapter,
        task: &ScanTask,
    ) -> std::result::Result<AnalyzerReport, AnalyzerError> {
        let timeout = self.config.adapter_timeout();
        let call = AssertUnwindSafe(adapter.analyze(&task.url, &task.options)).catch_unwind();

        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(AnalyzerError::Panicked(panic_message(panic.as_ref()))),
            Err(_) => Err(AnalyzerError::Timeout(timeout)),
        }
    }

    async fn fail(&self, scan_id: ScanId, message: &str) {
        match self.store.fail_scan(scan_id, message, Utc::now()).await {
            Ok(true) => info!(target: "scan::orchestrator", %scan_id, reason = message, "scan failed"),
            Ok(false) => {}
            Err(err) => error!(
                target: "scan::orchestrator",
                %scan_id,
                error = %err,
                "could not record scan failure"
            ),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
