//! Worker lifecycle: create, initialize, execute, dispose
//!
//! Every failure along the way (unknown tag, a failing or panicking step,
//! timeout, cancellation) is turned into a [`WorkflowStageResult`]; nothing
//! propagates to sibling stages.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::capability::{
    guarded, Capability, CapabilityRegistry, WorkerInput, WorkerOutput, WorkerResult,
};
use crate::error::OrchestratorError;
use crate::types::CapabilityTag;
use crate::workflow::{StageStatus, WorkflowStageResult};

/// Drives one worker instance through its lifecycle, bounded by an
/// admission semaphore and an optional timeout
pub struct WorkerLifecycleManager {
    capabilities: Arc<CapabilityRegistry>,
    admission: Arc<Semaphore>,
    max_concurrent: usize,
    /// Applied separately to `initialize`, `execute` and `dispose`
    timeout: Option<Duration>,
}

impl std::fmt::Debug for WorkerLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerLifecycleManager")
            .field("max_concurrent", &self.max_concurrent)
            .field("available", &self.admission.available_permits())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl WorkerLifecycleManager {
    /// `max_concurrent` is clamped to at least 1
    pub fn new(
        capabilities: Arc<CapabilityRegistry>,
        max_concurrent: usize,
        timeout: Option<Duration>,
    ) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            capabilities,
            admission: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            timeout,
        }
    }

    pub fn capabilities(&self) -> &Arc<CapabilityRegistry> {
        &self.capabilities
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Permits not currently held by a running worker
    pub fn available_slots(&self) -> usize {
        self.admission.available_permits()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Run one stage to a terminal result
    pub async fn execute(
        &self,
        tag: &CapabilityTag,
        workflow_id: &str,
        stage_id: &str,
        input: WorkerInput,
        cancel: CancellationToken,
    ) -> WorkflowStageResult {
        if cancel.is_cancelled() {
            return WorkflowStageResult::skipped(
                stage_id,
                tag,
                OrchestratorError::Cancelled.into(),
            );
        }

        // Admission: hold a permit from before construction until after dispose
        let _permit = tokio::select! {
            permit = Arc::clone(&self.admission).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    let err = OrchestratorError::WorkerExecution(
                        "admission semaphore closed".to_string(),
                    );
                    return stage_result(tag, stage_id, failed_before_start(err, 0));
                }
            },
            _ = cancel.cancelled() => {
                return WorkflowStageResult::skipped(
                    stage_id,
                    tag,
                    OrchestratorError::Cancelled.into(),
                );
            }
        };

        let started = Instant::now();
        let result = self.run_worker(tag, workflow_id, input, cancel).await;
        let result = WorkerResult {
            execution_time_ms: started.elapsed().as_millis() as u64,
            ..result
        };

        tracing::info!(
            workflow_id = %workflow_id,
            stage_id = %stage_id,
            capability = %tag,
            worker_id = %result.worker_id,
            success = result.success,
            elapsed_ms = result.execution_time_ms,
            "Stage finished"
        );

        stage_result(tag, stage_id, result)
    }

    async fn run_worker(
        &self,
        tag: &CapabilityTag,
        workflow_id: &str,
        input: WorkerInput,
        cancel: CancellationToken,
    ) -> WorkerResult {
        let worker = match self.capabilities.create(tag, workflow_id) {
            Ok(worker) => worker,
            Err(e) => {
                tracing::warn!(capability = %tag, "Could not construct worker: {}", e);
                return failed_before_start(e, 0);
            }
        };
        let worker_id = worker.id().to_string();

        tracing::debug!(worker_id = %worker_id, capability = %tag, "Initializing worker");
        let initialized = match self.bounded(guarded(worker.initialize())).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(OrchestratorError::WorkerExecution(format!(
                "initialize failed: {}",
                e
            ))),
            Ok(Err(panic)) => Err(OrchestratorError::WorkerExecution(format!(
                "initialize panicked: {}",
                panic
            ))),
            Err(timeout) => {
                tracing::warn!(worker_id = %worker_id, "Worker initialize timed out");
                Err(timeout)
            }
        };

        let outcome = match initialized {
            Ok(()) => {
                self.capabilities.register_running(workflow_id, tag, Arc::clone(&worker));
                let outcome = self.run_execute(&worker, input, cancel).await;
                self.capabilities.unregister_running(&worker_id);
                outcome
            }
            Err(e) => Err(e),
        };

        let disposed = match self.bounded(guarded(worker.dispose())).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(OrchestratorError::WorkerExecution(format!(
                "dispose failed: {}",
                e
            ))),
            Ok(Err(panic)) => Err(OrchestratorError::WorkerExecution(format!(
                "dispose panicked: {}",
                panic
            ))),
            Err(timeout) => {
                tracing::warn!(worker_id = %worker_id, "Worker dispose timed out");
                Err(timeout)
            }
        };

        let outcome = match (outcome, disposed) {
            (Ok(output), Ok(())) => Ok(output),
            (Err(e), Ok(())) => Err(e),
            (Ok(output), Err(e)) if output.success => Err(e),
            (Ok(output), Err(e)) => {
                tracing::warn!(worker_id = %worker_id, "{}", e);
                Ok(output)
            }
            (Err(e), Err(dispose_err)) => {
                tracing::warn!(worker_id = %worker_id, "{}", dispose_err);
                Err(e)
            }
        };

        match outcome {
            Ok(output) => WorkerResult {
                success: output.success,
                worker_id,
                data: output.data,
                error: output.error,
                execution_time_ms: 0,
            },
            Err(e) => WorkerResult {
                success: false,
                worker_id,
                data: None,
                error: Some(e.into()),
                execution_time_ms: 0,
            },
        }
    }

    /// Race `execute` against cancellation and the optional timer
    async fn run_execute(
        &self,
        worker: &Arc<dyn Capability>,
        input: WorkerInput,
        cancel: CancellationToken,
    ) -> Result<WorkerOutput, OrchestratorError> {
        let raced = async {
            tokio::select! {
                output = guarded(worker.execute(input, cancel.clone())) => output.map_err(|panic| {
                    OrchestratorError::WorkerExecution(format!("execute panicked: {}", panic))
                }),
                _ = cancel.cancelled() => Err(OrchestratorError::Cancelled),
            }
        };

        match self.bounded(raced).await {
            Ok(outcome) => outcome,
            Err(timeout) => {
                let id = worker.id();
                tracing::warn!(worker_id = %id, "Worker timed out");
                match guarded(worker.cancel()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::warn!(worker_id = %id, "Cancel after timeout failed: {}", e)
                    }
                    Err(panic) => {
                        tracing::warn!(worker_id = %id, "Cancel after timeout panicked: {}", panic)
                    }
                }
                Err(timeout)
            }
        }
    }

    /// Apply the configured limit to one lifecycle call
    async fn bounded<T>(&self, fut: impl Future<Output = T>) -> Result<T, OrchestratorError> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| OrchestratorError::Timeout(limit.as_millis() as u64)),
            None => Ok(fut.await),
        }
    }
}

fn failed_before_start(err: OrchestratorError, execution_time_ms: u64) -> WorkerResult {
    WorkerResult {
        success: false,
        worker_id: String::new(),
        data: None,
        error: Some(err.into()),
        execution_time_ms,
    }
}

fn stage_result(tag: &CapabilityTag, stage_id: &str, result: WorkerResult) -> WorkflowStageResult {
    WorkflowStageResult {
        stage_id: stage_id.to_string(),
        capability: tag.clone(),
        status: if result.success {
            StageStatus::Completed
        } else {
            StageStatus::Error
        },
        worker_id: (!result.worker_id.is_empty()).then_some(result.worker_id),
        output: result.data,
        error: result.error,
        execution_time_ms: result.execution_time_ms,
    }
}
