//! Orchestration engine
//!
//! The [`Orchestrator`] owns every piece of shared state (capability registry,
//! workflow registry, admission semaphore) and drives a request through
//! analysis, scheduling and aggregation:
//!
//! 1. Validate the [`UserRequest`]
//! 2. Ask the [`DecisionPolicy`] for a [`SpawnDecision`]
//! 3. Register an [`ExecutionWorkflow`] (removed again on every exit path)
//! 4. Run the decision through the [`ExecutionScheduler`]
//! 5. Fold the stage results into a [`WorkflowResult`]

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;

use crate::analyzer::{DecisionPolicy, KeywordAnalyzer};
use crate::capability::CapabilityRegistry;
use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::events::WorkflowEventSender;
use crate::lifecycle::WorkerLifecycleManager;
use crate::messages::{AgentMessage, MessageBus, MessageType};
use crate::resolver::{DependencyResolver, DependencyTable};
use crate::scheduler::{ExecutionScheduler, RunContext, ORCHESTRATOR_ADDRESS};
use crate::types::{SpawnDecision, UserRequest};
use crate::workflow::{ExecutionWorkflow, WorkflowRegistry, WorkflowResult, WorkflowStatus};

/// Multi-capability workflow engine
pub struct Orchestrator {
    config: OrchestratorConfig,
    policy: Box<dyn DecisionPolicy>,
    capabilities: Arc<CapabilityRegistry>,
    lifecycle: Arc<WorkerLifecycleManager>,
    dependencies: DependencyTable,
    workflows: Arc<WorkflowRegistry>,
    events: WorkflowEventSender,
    bus: Option<MessageBus>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("capabilities", &self.capabilities)
            .field("lifecycle", &self.lifecycle)
            .field("workflows", &self.workflows)
            .finish()
    }
}

impl Orchestrator {
    /// Create an engine with the keyword analyzer and no capabilities registered
    pub fn new(config: OrchestratorConfig) -> Self {
        let capabilities = Arc::new(CapabilityRegistry::new());
        let lifecycle = Arc::new(Self::build_lifecycle(&config, capabilities.clone()));
        let dependencies = config.dependency_table();

        Self {
            config,
            policy: Box::new(KeywordAnalyzer::default()),
            capabilities,
            lifecycle,
            dependencies,
            workflows: Arc::new(WorkflowRegistry::new()),
            events: WorkflowEventSender::none(),
            bus: None,
        }
    }

    /// Load `.orchestrator.toml`, validate it and build an engine from it
    pub fn from_config_file() -> Result<Self, OrchestratorError> {
        let config = OrchestratorConfig::load()?;
        config.validate()?;
        Ok(Self::new(config))
    }

    fn build_lifecycle(
        config: &OrchestratorConfig,
        capabilities: Arc<CapabilityRegistry>,
    ) -> WorkerLifecycleManager {
        WorkerLifecycleManager::new(
            capabilities,
            config.engine.max_concurrent_workers,
            config.engine.worker_timeout(),
        )
    }

    /// Replace the request analyzer
    pub fn with_policy(mut self, policy: Box<dyn DecisionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Install the capability constructors
    pub fn with_capabilities(mut self, capabilities: CapabilityRegistry) -> Self {
        self.capabilities = Arc::new(capabilities);
        self.lifecycle = Arc::new(Self::build_lifecycle(&self.config, self.capabilities.clone()));
        self
    }

    /// Replace the dependency table used by the dag strategy
    pub fn with_dependency_table(mut self, table: DependencyTable) -> Self {
        self.dependencies = table;
        self
    }

    /// Stream stage progress to a channel
    pub fn with_event_sender(mut self, events: WorkflowEventSender) -> Self {
        self.events = events;
        self
    }

    /// Publish task and cancel notices on a message bus
    pub fn with_message_bus(mut self, bus: MessageBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn capabilities(&self) -> &Arc<CapabilityRegistry> {
        &self.capabilities
    }

    pub fn workflows(&self) -> &Arc<WorkflowRegistry> {
        &self.workflows
    }

    pub fn dependency_table(&self) -> &DependencyTable {
        &self.dependencies
    }

    /// Decide which capabilities a request needs and how to run them
    pub fn analyze(&self, request: &UserRequest) -> SpawnDecision {
        self.policy.analyze(request)
    }

    fn scheduler(&self) -> ExecutionScheduler {
        let scheduler = ExecutionScheduler::new(
            self.lifecycle.clone(),
            DependencyResolver::new(self.dependencies.clone()),
            self.workflows.clone(),
        )
        .with_event_sender(self.events.clone())
        .with_failure_policy(self.config.engine.dependency_failure);

        match &self.bus {
            Some(bus) => scheduler.with_message_bus(bus.clone()),
            None => scheduler,
        }
    }

    /// Process one request to completion
    ///
    /// Returns `Err` only for an invalid request or a dependency cycle; every
    /// per-stage failure is reported inside the [`WorkflowResult`]. The
    /// workflow is removed from the registry on every exit path, including
    /// the returned future being dropped.
    pub async fn process_request(
        &self,
        request: UserRequest,
    ) -> Result<WorkflowResult, OrchestratorError> {
        request.validate()?;

        let started = Instant::now();
        let decision = self.analyze(&request);

        let workflow = ExecutionWorkflow::new(request.id.as_str(), decision.strategy);
        let workflow_id = workflow.id.clone();
        let (cancel, _guard) = self.workflows.register_guarded(workflow);

        tracing::info!(
            workflow_id = %workflow_id,
            request_id = %request.id,
            strategy = %decision.strategy,
            priority = ?decision.priority,
            "Processing request: {}",
            decision.reasoning
        );

        self.set_status(&workflow_id, WorkflowStatus::Running);
        self.events
            .workflow_started(&workflow_id, &request.id, decision.strategy, &decision.capabilities);

        let ctx = RunContext {
            workflow_id: &workflow_id,
            request: &request,
            cancel,
        };

        let stages = match self.scheduler().run(&ctx, &decision).await {
            Ok(stages) => stages,
            Err(e) => {
                tracing::error!(workflow_id = %workflow_id, "Workflow aborted: {}", e);
                self.set_status(&workflow_id, WorkflowStatus::Failed);
                self.events.workflow_finished(
                    &workflow_id,
                    WorkflowStatus::Failed,
                    started.elapsed().as_millis() as u64,
                );
                return Err(e);
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let result = WorkflowResult::aggregate(&workflow_id, stages, elapsed_ms);
        let status = if result.success {
            WorkflowStatus::Completed
        } else {
            WorkflowStatus::Failed
        };
        self.set_status(&workflow_id, status);
        self.events.workflow_finished(&workflow_id, status, result.execution_time_ms);

        tracing::info!(
            workflow_id = %workflow_id,
            status = ?status,
            stages = result.stages.len(),
            failed = result.failed_stages().count(),
            elapsed_ms = result.execution_time_ms,
            "Workflow finished"
        );

        Ok(result)
    }

    fn set_status(&self, workflow_id: &str, status: WorkflowStatus) {
        let applied = self.workflows.update(workflow_id, |wf| wf.transition(status));
        if applied != Some(true) {
            tracing::debug!(
                workflow_id = %workflow_id,
                status = ?status,
                "Status transition not applied"
            );
        }
    }

    /// Cancel one workflow: every running worker of it gets `cancel()`, and
    /// stages not yet started are skipped. Returns the number of workers
    /// cancelled.
    ///
    /// The running set is drained before the token fires, and drained again
    /// after: a stage admitted while the first drain was awaiting `cancel()`
    /// calls still gets its own `cancel()`. Draining removes a worker, so none
    /// is cancelled twice.
    pub async fn cancel_workflow(&self, workflow_id: &str) -> usize {
        let mut cancelled = self.capabilities.cancel_workflow(workflow_id).await;
        let signalled = self.workflows.cancel(workflow_id);
        cancelled += self.capabilities.cancel_workflow(workflow_id).await;

        if signalled || cancelled > 0 {
            tracing::info!(workflow_id = %workflow_id, workers = cancelled, "Workflow cancelled");
            self.publish_cancel(workflow_id, Some(cancelled));
        }

        cancelled
    }

    /// Cancel one running worker without touching the rest of its workflow
    pub async fn cancel_worker(&self, worker_id: &str) -> bool {
        let cancelled = self.capabilities.cancel_worker(worker_id).await;
        if cancelled {
            tracing::info!(worker_id = %worker_id, "Worker cancelled");
        }
        cancelled
    }

    /// Cancel every active workflow; returns the number of workers cancelled
    pub async fn cancel_all(&self) -> usize {
        let ids = self.workflows.active_ids();
        let cancelled = self.capabilities.cancel_all().await;
        for id in &ids {
            self.workflows.cancel(id);
            self.publish_cancel(id, None);
        }

        tracing::info!(workflows = ids.len(), workers = cancelled, "All workflows cancelled");
        cancelled
    }

    fn publish_cancel(&self, workflow_id: &str, workers: Option<usize>) {
        if let Some(bus) = &self.bus {
            bus.publish(
                AgentMessage::new(
                    MessageType::Cancel,
                    ORCHESTRATOR_ADDRESS,
                    "*",
                    json!({ "workflowId": workflow_id, "workers": workers }),
                )
                .with_correlation_id(workflow_id),
            );
        }
    }

    /// Ids of the workflows currently in flight
    pub fn active_workflows(&self) -> Vec<String> {
        self.workflows.active_ids()
    }

    /// Workers currently between `initialize` and `dispose`
    pub fn running_workers(&self) -> usize {
        self.capabilities.running_count()
    }
}
