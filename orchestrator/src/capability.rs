//! Capability contract and registry
//!
//! Every concrete capability (file discovery, planner, editor, reviewer,
//! tester) implements [`Capability`]. The [`CapabilityRegistry`] maps a tag to a
//! constructor and tracks worker instances while they execute, so a workflow
//! can be cancelled by id.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use async_trait::async_trait;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{OrchestratorError, WorkerError};
use crate::types::{CapabilityTag, UserRequest};

// ============================================================================
// Worker Input / Output
// ============================================================================

/// Everything a worker gets to see for one execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInput {
    /// The originating request
    pub request: UserRequest,
    /// Output of the previous stage (sequential strategy only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<Value>,
    /// Outputs of completed dependencies (dag strategy only)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<CapabilityTag, Value>,
}

impl WorkerInput {
    pub fn new(request: UserRequest) -> Self {
        Self {
            request,
            previous: None,
            dependencies: BTreeMap::new(),
        }
    }

    pub fn with_previous(mut self, previous: Option<Value>) -> Self {
        self.previous = previous;
        self
    }

    pub fn with_dependencies(mut self, dependencies: BTreeMap<CapabilityTag, Value>) -> Self {
        self.dependencies = dependencies;
        self
    }
}

/// What a worker reports back from `execute`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerOutput {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WorkerError>,
}

impl WorkerOutput {
    pub fn success(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: WorkerError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
        }
    }

    /// Expected cancellation, reported as a failure rather than an error
    pub fn cancelled() -> Self {
        Self::failure(OrchestratorError::Cancelled.to_worker_error())
    }
}

/// Result of exactly one worker execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerResult {
    pub success: bool,
    pub worker_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WorkerError>,
    pub execution_time_ms: u64,
}

// ============================================================================
// Capability Contract
// ============================================================================

/// Uniform lifecycle every pluggable capability must satisfy
///
/// `execute` reports expected failures through [`WorkerOutput`]; it must check
/// the token on entry and at each internal suspension point.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Unique id of this worker instance
    fn id(&self) -> &str;

    async fn initialize(&self) -> Result<()>;

    async fn execute(&self, input: WorkerInput, cancel: CancellationToken) -> WorkerOutput;

    /// Request prompt termination of an in-flight `execute`
    async fn cancel(&self) -> Result<()>;

    async fn dispose(&self) -> Result<()>;
}

/// Passed to a constructor when a worker is created
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub workflow_id: String,
    pub capability: CapabilityTag,
}

/// Builds a worker instance for one stage execution
pub type CapabilityFactory =
    Arc<dyn Fn(WorkerConfig) -> Result<Arc<dyn Capability>> + Send + Sync>;

// ============================================================================
// Capability Registry
// ============================================================================

struct RunningWorker {
    workflow_id: String,
    capability: CapabilityTag,
    worker: Arc<dyn Capability>,
}

/// Constructors by tag, plus the set of currently running workers
#[derive(Default)]
pub struct CapabilityRegistry {
    factories: HashMap<CapabilityTag, CapabilityFactory>,
    running: Mutex<HashMap<String, RunningWorker>>,
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("capabilities", &self.tags())
            .field("running", &self.running_count())
            .finish()
    }
}

impl CapabilityRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor for a tag, replacing any previous one
    pub fn register<F>(&mut self, tag: CapabilityTag, factory: F)
    where
        F: Fn(WorkerConfig) -> Result<Arc<dyn Capability>> + Send + Sync + 'static,
    {
        self.factories.insert(tag, Arc::new(factory));
    }

    /// Builder form of [`register`](Self::register)
    pub fn with_capability<F>(mut self, tag: CapabilityTag, factory: F) -> Self
    where
        F: Fn(WorkerConfig) -> Result<Arc<dyn Capability>> + Send + Sync + 'static,
    {
        self.register(tag, factory);
        self
    }

    pub fn contains(&self, tag: &CapabilityTag) -> bool {
        self.factories.contains_key(tag)
    }

    /// Registered tags, sorted
    pub fn tags(&self) -> Vec<CapabilityTag> {
        let mut tags: Vec<_> = self.factories.keys().cloned().collect();
        tags.sort();
        tags
    }

    /// Construct a fresh worker for `tag`; a panicking constructor is
    /// reported as a [`OrchestratorError::WorkerExecution`]
    pub fn create(
        &self,
        tag: &CapabilityTag,
        workflow_id: &str,
    ) -> Result<Arc<dyn Capability>, OrchestratorError> {
        let factory = self
            .factories
            .get(tag)
            .ok_or_else(|| OrchestratorError::UnknownCapability(tag.clone()))?;

        let config = WorkerConfig {
            worker_id: new_worker_id(tag),
            workflow_id: workflow_id.to_string(),
            capability: tag.clone(),
        };

        match std::panic::catch_unwind(AssertUnwindSafe(|| factory(config))) {
            Ok(Ok(worker)) => Ok(worker),
            Ok(Err(e)) => Err(OrchestratorError::WorkerExecution(format!(
                "failed to construct '{}': {}",
                tag, e
            ))),
            Err(panic) => Err(OrchestratorError::WorkerExecution(format!(
                "construct '{}' panicked: {}",
                tag,
                panic_message(panic)
            ))),
        }
    }

    fn running(&self) -> std::sync::MutexGuard<'_, HashMap<String, RunningWorker>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark a worker as running for the duration of its `execute`
    pub fn register_running(
        &self,
        workflow_id: &str,
        capability: &CapabilityTag,
        worker: Arc<dyn Capability>,
    ) {
        let id = worker.id().to_string();
        self.running().insert(
            id,
            RunningWorker {
                workflow_id: workflow_id.to_string(),
                capability: capability.clone(),
                worker,
            },
        );
    }

    pub fn unregister_running(&self, worker_id: &str) -> bool {
        self.running().remove(worker_id).is_some()
    }

    /// Look up a running worker by id
    pub fn get_running(&self, worker_id: &str) -> Option<Arc<dyn Capability>> {
        self.running().get(worker_id).map(|r| r.worker.clone())
    }

    pub fn running_count(&self) -> usize {
        self.running().len()
    }

    /// Ids and tags of the running workers of one workflow
    pub fn running_in(&self, workflow_id: &str) -> Vec<(String, CapabilityTag)> {
        self.running()
            .iter()
            .filter(|(_, r)| r.workflow_id == workflow_id)
            .map(|(id, r)| (id.clone(), r.capability.clone()))
            .collect()
    }

    /// Cancel a single running worker and drop it from the running set;
    /// `false` if no worker with that id is running
    pub async fn cancel_worker(&self, worker_id: &str) -> bool {
        let Some(running) = self.running().remove(worker_id) else {
            return false;
        };
        cancel_workers(vec![(worker_id.to_string(), running)]).await;
        true
    }

    /// Cancel every running worker of one workflow and drop them from the
    /// running set; returns how many were cancelled
    pub async fn cancel_workflow(&self, workflow_id: &str) -> usize {
        let drained: Vec<_> = {
            let mut running = self.running();
            let ids: Vec<String> = running
                .iter()
                .filter(|(_, r)| r.workflow_id == workflow_id)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| running.remove(&id).map(|r| (id, r)))
                .collect()
        };

        cancel_workers(drained).await
    }

    /// Cancel every running worker regardless of workflow
    pub async fn cancel_all(&self) -> usize {
        let drained: Vec<_> = self.running().drain().collect();
        cancel_workers(drained).await
    }
}

async fn cancel_workers(workers: Vec<(String, RunningWorker)>) -> usize {
    let count = workers.len();
    for (id, running) in workers {
        tracing::info!(
            worker_id = %id,
            workflow_id = %running.workflow_id,
            capability = %running.capability,
            "Cancelling worker"
        );
        match guarded(running.worker.cancel()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(worker_id = %id, "Worker cancel failed: {}", e),
            Err(panic) => tracing::warn!(worker_id = %id, "Worker cancel panicked: {}", panic),
        }
    }
    count
}

/// Await a future, turning a panic into an error message
pub(crate) async fn guarded<T>(fut: impl Future<Output = T>) -> Result<T, String> {
    AssertUnwindSafe(fut).catch_unwind().await.map_err(panic_message)
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn new_worker_id(tag: &CapabilityTag) -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", tag, &uuid[..8])
}
