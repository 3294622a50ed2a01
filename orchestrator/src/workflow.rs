//! Workflow state, registry and result aggregation
//!
//! An [`ExecutionWorkflow`] is created per request, lives in the
//! [`WorkflowRegistry`] only while it is in flight, and is folded into a
//! [`WorkflowResult`] at the end.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::WorkerError;
use crate::types::{CapabilityTag, ExecutionStrategy};

// ============================================================================
// Status Machines
// ============================================================================

/// `pending -> running -> {completed | failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn can_transition_to(self, next: WorkflowStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
        )
    }
}

/// `pending -> running -> {completed | error | skipped}`
///
/// A stage may also go straight from `pending` to `skipped` when it is never
/// started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Error,
    Skipped,
}

impl StageStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Skipped)
    }

    pub fn can_transition_to(self, next: StageStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Skipped)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Error)
                | (Self::Running, Self::Skipped)
        )
    }
}

// ============================================================================
// Workflow Records
// ============================================================================

/// Record of one unit execution inside a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStage {
    pub id: String,
    pub capability: CapabilityTag,
    pub dependencies: BTreeSet<CapabilityTag>,
    pub status: StageStatus,
    pub inputs: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Value>,
}

impl WorkflowStage {
    pub fn new(
        capability: CapabilityTag,
        dependencies: BTreeSet<CapabilityTag>,
        inputs: Value,
    ) -> Self {
        Self {
            id: format!("stage-{}", uuid::Uuid::new_v4()),
            capability,
            dependencies,
            status: StageStatus::Pending,
            inputs,
            outputs: None,
        }
    }
}

/// A request being processed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionWorkflow {
    pub id: String,
    pub request_id: String,
    pub strategy: ExecutionStrategy,
    pub stages: Vec<WorkflowStage>,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionWorkflow {
    /// Create a pending workflow with a process-unique id
    pub fn new(request_id: impl Into<String>, strategy: ExecutionStrategy) -> Self {
        let now = Utc::now();
        Self {
            id: format!("wf-{}", uuid::Uuid::new_v4()),
            request_id: request_id.into(),
            strategy,
            stages: Vec::new(),
            status: WorkflowStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a status transition; illegal transitions are ignored
    pub fn transition(&mut self, next: WorkflowStatus) -> bool {
        if !self.status.can_transition_to(next) {
            tracing::warn!(
                workflow_id = %self.id,
                from = ?self.status,
                to = ?next,
                "Ignoring illegal workflow transition"
            );
            return false;
        }
        self.status = next;
        self.updated_at = Utc::now();
        true
    }

    pub fn push_stage(&mut self, stage: WorkflowStage) {
        self.stages.push(stage);
        self.updated_at = Utc::now();
    }

    pub fn stage(&self, stage_id: &str) -> Option<&WorkflowStage> {
        self.stages.iter().find(|s| s.id == stage_id)
    }

    /// Move a stage to `next`, attaching outputs if given
    pub fn update_stage(
        &mut self,
        stage_id: &str,
        next: StageStatus,
        outputs: Option<Value>,
    ) -> bool {
        let Some(stage) = self.stages.iter_mut().find(|s| s.id == stage_id) else {
            return false;
        };
        if !stage.status.can_transition_to(next) {
            tracing::warn!(
                stage_id = %stage_id,
                from = ?stage.status,
                to = ?next,
                "Ignoring illegal stage transition"
            );
            return false;
        }
        stage.status = next;
        if outputs.is_some() {
            stage.outputs = outputs;
        }
        self.updated_at = Utc::now();
        true
    }
}

// ============================================================================
// Results
// ============================================================================

/// Terminal outcome of one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStageResult {
    pub stage_id: String,
    pub capability: CapabilityTag,
    pub status: StageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WorkerError>,
    pub execution_time_ms: u64,
}

impl WorkflowStageResult {
    pub fn succeeded(&self) -> bool {
        self.status == StageStatus::Completed
    }

    /// A stage that failed without a worker being constructed
    pub fn failed(stage_id: &str, capability: &CapabilityTag, error: WorkerError) -> Self {
        Self {
            status: StageStatus::Error,
            ..Self::skipped(stage_id, capability, error)
        }
    }

    /// A stage that never started
    pub fn skipped(stage_id: &str, capability: &CapabilityTag, error: WorkerError) -> Self {
        Self {
            stage_id: stage_id.to_string(),
            capability: capability.clone(),
            status: StageStatus::Skipped,
            worker_id: None,
            output: None,
            error: Some(error),
            execution_time_ms: 0,
        }
    }
}

/// Kind of durable output surfaced alongside the result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Discovery,
    Plan,
    Diff,
    Review,
    Test,
    Other,
}

impl ArtifactKind {
    pub fn for_capability(tag: &CapabilityTag) -> Self {
        match tag.as_str() {
            "file-discovery" => Self::Discovery,
            "planning" => Self::Plan,
            "editing" => Self::Diff,
            "reviewing" => Self::Review,
            "testing" => Self::Test,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowArtifact {
    pub kind: ArtifactKind,
    pub capability: CapabilityTag,
    pub stage_id: String,
    pub content: Value,
}

/// The value returned to the caller once a workflow has finished
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowResult {
    pub workflow_id: String,
    /// AND of every stage's success (vacuously true with no stages)
    pub success: bool,
    pub stages: Vec<WorkflowStageResult>,
    pub artifacts: Vec<WorkflowArtifact>,
    pub execution_time_ms: u64,
}

impl WorkflowResult {
    /// Fold stage results into the final result
    pub fn aggregate(
        workflow_id: &str,
        stages: Vec<WorkflowStageResult>,
        execution_time_ms: u64,
    ) -> Self {
        let success = stages.iter().all(WorkflowStageResult::succeeded);
        let artifacts = gather_artifacts(&stages);
        Self {
            workflow_id: workflow_id.to_string(),
            success,
            stages,
            artifacts,
            execution_time_ms,
        }
    }

    pub fn failed_stages(&self) -> impl Iterator<Item = &WorkflowStageResult> {
        self.stages.iter().filter(|s| !s.succeeded())
    }
}

/// Collect artifacts from completed stage outputs
///
/// A completed stage with a null or missing output contributes nothing. An
/// output of the form `{"artifacts": [...]}` contributes one artifact per
/// element; anything else is a single artifact.
pub fn gather_artifacts(stages: &[WorkflowStageResult]) -> Vec<WorkflowArtifact> {
    let mut artifacts = Vec::new();

    for stage in stages.iter().filter(|s| s.succeeded()) {
        let Some(output) = stage.output.as_ref().filter(|v| !v.is_null()) else {
            continue;
        };
        let kind = ArtifactKind::for_capability(&stage.capability);
        let make = |content: &Value| WorkflowArtifact {
            kind,
            capability: stage.capability.clone(),
            stage_id: stage.stage_id.clone(),
            content: content.clone(),
        };

        match output.get("artifacts").and_then(Value::as_array) {
            Some(items) => artifacts.extend(items.iter().map(make)),
            None => artifacts.push(make(output)),
        }
    }

    artifacts
}

// ============================================================================
// Workflow Registry
// ============================================================================

struct ActiveWorkflow {
    workflow: ExecutionWorkflow,
    cancel: CancellationToken,
}

/// Single authoritative map of in-flight workflows
#[derive(Default)]
pub struct WorkflowRegistry {
    active: Mutex<HashMap<String, ActiveWorkflow>>,
}

impl std::fmt::Debug for WorkflowRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowRegistry")
            .field("active", &self.active_ids())
            .finish()
    }
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn active(&self) -> MutexGuard<'_, HashMap<String, ActiveWorkflow>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track a workflow; returns its cancellation token
    pub fn register(&self, workflow: ExecutionWorkflow) -> CancellationToken {
        let cancel = CancellationToken::new();
        tracing::debug!(workflow_id = %workflow.id, "Registering workflow");
        self.active().insert(
            workflow.id.clone(),
            ActiveWorkflow {
                workflow,
                cancel: cancel.clone(),
            },
        );
        cancel
    }

    /// Register and return a guard that removes the entry when dropped
    pub fn register_guarded(
        self: &Arc<Self>,
        workflow: ExecutionWorkflow,
    ) -> (CancellationToken, RegistryGuard) {
        let id = workflow.id.clone();
        let cancel = self.register(workflow);
        let guard = RegistryGuard {
            registry: Arc::clone(self),
            workflow_id: id,
        };
        (cancel, guard)
    }

    pub fn remove(&self, workflow_id: &str) -> Option<ExecutionWorkflow> {
        self.active().remove(workflow_id).map(|a| a.workflow)
    }

    /// Snapshot of a live workflow
    pub fn get(&self, workflow_id: &str) -> Option<ExecutionWorkflow> {
        self.active().get(workflow_id).map(|a| a.workflow.clone())
    }

    pub fn contains(&self, workflow_id: &str) -> bool {
        self.active().contains_key(workflow_id)
    }

    pub fn len(&self) -> usize {
        self.active().len()
    }

    pub fn is_empty(&self) -> bool {
        self.active().is_empty()
    }

    pub fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.active().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Mutate a live workflow; returns `None` if it is not registered
    pub fn update<R>(
        &self,
        workflow_id: &str,
        f: impl FnOnce(&mut ExecutionWorkflow) -> R,
    ) -> Option<R> {
        self.active().get_mut(workflow_id).map(|a| f(&mut a.workflow))
    }

    pub fn token(&self, workflow_id: &str) -> Option<CancellationToken> {
        self.active().get(workflow_id).map(|a| a.cancel.clone())
    }

    /// Fire the workflow's cancellation token
    pub fn cancel(&self, workflow_id: &str) -> bool {
        match self.token(workflow_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Removes a workflow from its registry when dropped, whatever the outcome
pub struct RegistryGuard {
    registry: Arc<WorkflowRegistry>,
    workflow_id: String,
}

impl RegistryGuard {
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }
}

impl Drop for RegistryGuard {
    fn drop(&mut self) {
        if self.registry.remove(&self.workflow_id).is_some() {
            tracing::debug!(workflow_id = %self.workflow_id, "Workflow removed from registry");
        }
    }
}
