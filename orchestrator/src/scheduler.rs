//! Execution strategies: sequential, parallel and dependency waves
//!
//! The scheduler appends a stage to the live workflow for every unit it
//! spawns, hands the unit to the [`WorkerLifecycleManager`] and records the
//! terminal status. Concurrency is bounded by the lifecycle manager's
//! admission semaphore, not here.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::capability::WorkerInput;
use crate::config::DependencyFailurePolicy;
use crate::error::{OrchestratorError, WorkerError};
use crate::events::WorkflowEventSender;
use crate::lifecycle::WorkerLifecycleManager;
use crate::messages::{AgentMessage, MessageBus, MessageType};
use crate::resolver::DependencyResolver;
use crate::types::{CapabilityTag, ExecutionStrategy, SpawnDecision, UserRequest};
use crate::workflow::{StageStatus, WorkflowRegistry, WorkflowStage, WorkflowStageResult};

/// Sender name used on the message bus
pub const ORCHESTRATOR_ADDRESS: &str = "orchestrator";

/// Everything a strategy needs to know about the workflow it is running
#[derive(Debug, Clone)]
pub struct RunContext<'a> {
    pub workflow_id: &'a str,
    pub request: &'a UserRequest,
    pub cancel: CancellationToken,
}

/// Runs spawn decisions against the lifecycle manager
pub struct ExecutionScheduler {
    lifecycle: Arc<WorkerLifecycleManager>,
    resolver: DependencyResolver,
    workflows: Arc<WorkflowRegistry>,
    events: WorkflowEventSender,
    bus: Option<MessageBus>,
    failure_policy: DependencyFailurePolicy,
}

impl ExecutionScheduler {
    pub fn new(
        lifecycle: Arc<WorkerLifecycleManager>,
        resolver: DependencyResolver,
        workflows: Arc<WorkflowRegistry>,
    ) -> Self {
        Self {
            lifecycle,
            resolver,
            workflows,
            events: WorkflowEventSender::none(),
            bus: None,
            failure_policy: DependencyFailurePolicy::default(),
        }
    }

    pub fn with_event_sender(mut self, events: WorkflowEventSender) -> Self {
        self.events = events;
        self
    }

    pub fn with_message_bus(mut self, bus: MessageBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_failure_policy(mut self, policy: DependencyFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn resolver(&self) -> &DependencyResolver {
        &self.resolver
    }

    /// Execute a decision; only a dependency cycle is fatal
    pub async fn run(
        &self,
        ctx: &RunContext<'_>,
        decision: &SpawnDecision,
    ) -> Result<Vec<WorkflowStageResult>, OrchestratorError> {
        tracing::info!(
            workflow_id = %ctx.workflow_id,
            strategy = %decision.strategy,
            capabilities = ?decision.capabilities,
            "Running workflow"
        );

        let capabilities = &decision.capabilities;
        match decision.strategy {
            ExecutionStrategy::Sequential => Ok(self.run_sequential(ctx, capabilities).await),
            ExecutionStrategy::Parallel => Ok(self.run_parallel(ctx, capabilities).await),
            ExecutionStrategy::Dag => self.run_dag(ctx, capabilities).await,
        }
    }

    /// One at a time, chaining each output into the next input; stops at the
    /// first stage that does not complete
    pub async fn run_sequential(
        &self,
        ctx: &RunContext<'_>,
        capabilities: &[CapabilityTag],
    ) -> Vec<WorkflowStageResult> {
        let mut results = Vec::with_capacity(capabilities.len());
        let mut previous: Option<Value> = None;

        for tag in capabilities {
            let input = WorkerInput::new(ctx.request.clone()).with_previous(previous.take());
            let result = self.run_stage(ctx, tag, BTreeSet::new(), input).await;
            let succeeded = result.succeeded();
            previous = result.output.clone();
            results.push(result);

            if !succeeded {
                tracing::info!(
                    workflow_id = %ctx.workflow_id,
                    capability = %tag,
                    not_attempted = capabilities.len() - results.len(),
                    "Sequential run stopped at failed stage"
                );
                break;
            }
        }

        results
    }

    /// All at once without chaining; results in request order
    pub async fn run_parallel(
        &self,
        ctx: &RunContext<'_>,
        capabilities: &[CapabilityTag],
    ) -> Vec<WorkflowStageResult> {
        let stages = capabilities.iter().map(|tag| {
            let input = WorkerInput::new(ctx.request.clone());
            self.run_stage(ctx, tag, BTreeSet::new(), input)
        });

        join_all(stages).await
    }

    /// Wave by wave; a wave starts only after every stage of the previous
    /// wave has terminated
    pub async fn run_dag(
        &self,
        ctx: &RunContext<'_>,
        capabilities: &[CapabilityTag],
    ) -> Result<Vec<WorkflowStageResult>, OrchestratorError> {
        let waves = self.resolver.waves(capabilities)?;
        let requested: BTreeSet<CapabilityTag> = capabilities.iter().cloned().collect();

        // Outputs of completed stages, by capability
        let mut completed: HashMap<CapabilityTag, Option<Value>> = HashMap::new();
        let mut results = Vec::with_capacity(requested.len());

        for (index, wave) in waves.iter().enumerate() {
            tracing::debug!(
                workflow_id = %ctx.workflow_id,
                wave = index,
                tags = ?wave,
                "Starting wave"
            );

            let stages = wave
                .iter()
                .map(|tag| self.run_dag_stage(ctx, tag, &requested, &completed));
            let wave_results = join_all(stages).await;

            for result in wave_results {
                if result.succeeded() {
                    completed.insert(result.capability.clone(), result.output.clone());
                }
                results.push(result);
            }
        }

        Ok(results)
    }

    async fn run_dag_stage(
        &self,
        ctx: &RunContext<'_>,
        tag: &CapabilityTag,
        requested: &BTreeSet<CapabilityTag>,
        completed: &HashMap<CapabilityTag, Option<Value>>,
    ) -> WorkflowStageResult {
        let dependencies: BTreeSet<CapabilityTag> = self
            .resolver
            .table()
            .dependencies_of(tag)
            .into_iter()
            .filter(|dep| requested.contains(dep))
            .collect();

        let failed: Vec<&CapabilityTag> = dependencies
            .iter()
            .filter(|dep| !completed.contains_key(*dep))
            .collect();

        if !failed.is_empty() && self.failure_policy == DependencyFailurePolicy::SkipDependents {
            let names: Vec<&str> = failed.iter().map(|t| t.as_str()).collect();
            let error = WorkerError::new(
                "DEPENDENCY_FAILED",
                format!("dependencies did not complete: {}", names.join(", ")),
                false,
            );
            return self.skip_stage(ctx, tag, dependencies, error);
        }

        let outputs: BTreeMap<CapabilityTag, Value> = dependencies
            .iter()
            .filter_map(|dep| {
                let output = completed.get(dep)?;
                Some((dep.clone(), output.clone().unwrap_or(Value::Null)))
            })
            .collect();

        let input = WorkerInput::new(ctx.request.clone()).with_dependencies(outputs);
        self.run_stage(ctx, tag, dependencies, input).await
    }

    /// Spawn one stage through the lifecycle manager and record its outcome
    async fn run_stage(
        &self,
        ctx: &RunContext<'_>,
        tag: &CapabilityTag,
        dependencies: BTreeSet<CapabilityTag>,
        input: WorkerInput,
    ) -> WorkflowStageResult {
        let inputs = serde_json::to_value(&input).unwrap_or_default();
        let stage = WorkflowStage::new(tag.clone(), dependencies, inputs);
        let stage_id = stage.id.clone();

        self.workflows.update(ctx.workflow_id, |wf| {
            wf.push_stage(stage);
            wf.update_stage(&stage_id, StageStatus::Running, None);
        });
        self.events.stage_started(ctx.workflow_id, &stage_id, tag);
        self.publish(
            AgentMessage::new(
                MessageType::TaskAssign,
                ORCHESTRATOR_ADDRESS,
                tag.as_str(),
                json!({ "workflowId": ctx.workflow_id, "stageId": stage_id, "capability": tag }),
            )
            .with_correlation_id(stage_id.as_str()),
        );

        let result = if self.resolver.table().contains(tag) {
            self.lifecycle
                .execute(tag, ctx.workflow_id, &stage_id, input, ctx.cancel.child_token())
                .await
        } else {
            tracing::warn!(
                workflow_id = %ctx.workflow_id,
                capability = %tag,
                "Capability has no dependency table entry"
            );
            let error = OrchestratorError::UnknownCapability(tag.clone());
            WorkflowStageResult::failed(&stage_id, tag, error.into())
        };

        self.record_terminal(ctx, &result);
        result
    }

    /// Record a stage that is never started
    fn skip_stage(
        &self,
        ctx: &RunContext<'_>,
        tag: &CapabilityTag,
        dependencies: BTreeSet<CapabilityTag>,
        error: WorkerError,
    ) -> WorkflowStageResult {
        let stage = WorkflowStage::new(tag.clone(), dependencies, Value::Null);
        let result = WorkflowStageResult::skipped(&stage.id, tag, error);

        tracing::info!(
            workflow_id = %ctx.workflow_id,
            stage_id = %stage.id,
            capability = %tag,
            "Skipping stage with failed dependencies"
        );

        self.workflows.update(ctx.workflow_id, |wf| wf.push_stage(stage));
        self.record_terminal(ctx, &result);
        result
    }

    fn record_terminal(&self, ctx: &RunContext<'_>, result: &WorkflowStageResult) {
        self.workflows.update(ctx.workflow_id, |wf| {
            wf.update_stage(&result.stage_id, result.status, result.output.clone());
        });
        self.events.stage_finished(
            ctx.workflow_id,
            &result.stage_id,
            &result.capability,
            result.status,
            result.execution_time_ms,
        );

        let message_type = if result.succeeded() {
            MessageType::TaskComplete
        } else {
            MessageType::TaskFail
        };
        let from = result.worker_id.as_deref().unwrap_or(result.capability.as_str());
        self.publish(
            AgentMessage::new(
                message_type,
                from,
                ORCHESTRATOR_ADDRESS,
                json!({
                    "workflowId": ctx.workflow_id,
                    "stageId": result.stage_id,
                    "status": result.status,
                    "error": result.error,
                    "executionTimeMs": result.execution_time_ms,
                }),
            )
            .with_correlation_id(result.stage_id.as_str()),
        );
    }

    fn publish(&self, message: AgentMessage) {
        if let Some(bus) = &self.bus {
            bus.publish(message);
        }
    }
}
