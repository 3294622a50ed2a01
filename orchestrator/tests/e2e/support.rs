//! Shared scripted workers and engine builders for the e2e tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agent_orchestrator::{
    Capability, CapabilityRegistry, CapabilityTag, CancellationToken, DecisionPolicy,
    ExecutionStrategy, Orchestrator, OrchestratorConfig, Priority, SpawnDecision, UserRequest,
    WorkerError, WorkerInput, WorkerOutput,
};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

/// How a scripted worker behaves in `execute`
#[derive(Debug, Clone, Copy)]
pub enum Script {
    Succeed,
    Fail,
    /// Succeed after the given delay
    Sleep(Duration),
    /// Run until cancelled
    Hang,
    /// Run until cancelled; `cancel()` panics
    HangPanicOnCancel,
    /// Succeed once `cancel()` is called, which then takes a while to return
    SlowCancel(Duration),
}

/// Counts lifecycle calls across every scripted worker of one engine
#[derive(Default)]
pub struct WorkerCounters {
    pub executed: AtomicUsize,
    pub cancelled: AtomicUsize,
    pub disposed: AtomicUsize,
    pub active: AtomicUsize,
    pub peak: AtomicUsize,
}

impl WorkerCounters {
    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn disposed(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct ScriptedWorker {
    id: String,
    script: Script,
    counters: Arc<WorkerCounters>,
    stop: CancellationToken,
}

#[async_trait]
impl Capability for ScriptedWorker {
    fn id(&self) -> &str {
        &self.id
    }

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, _input: WorkerInput, cancel: CancellationToken) -> WorkerOutput {
        if cancel.is_cancelled() {
            return WorkerOutput::cancelled();
        }

        self.counters.executed.fetch_add(1, Ordering::SeqCst);
        let now = self.counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak.fetch_max(now, Ordering::SeqCst);

        let output = match self.script {
            Script::Succeed => WorkerOutput::success(json!({ "worker": self.id })),
            Script::Fail => {
                WorkerOutput::failure(WorkerError::new("SCRIPTED_FAILURE", "told to fail", false))
            }
            Script::Sleep(d) => tokio::select! {
                _ = tokio::time::sleep(d) => {
                    WorkerOutput::success(json!({ "slept_ms": d.as_millis() as u64 }))
                }
                _ = cancel.cancelled() => WorkerOutput::cancelled(),
                _ = self.stop.cancelled() => WorkerOutput::cancelled(),
            },
            Script::Hang | Script::HangPanicOnCancel => tokio::select! {
                _ = cancel.cancelled() => WorkerOutput::cancelled(),
                _ = self.stop.cancelled() => WorkerOutput::cancelled(),
            },
            Script::SlowCancel(_) => tokio::select! {
                _ = cancel.cancelled() => WorkerOutput::cancelled(),
                _ = self.stop.cancelled() => WorkerOutput::success(json!({ "worker": self.id })),
            },
        };

        self.counters.active.fetch_sub(1, Ordering::SeqCst);
        output
    }

    async fn cancel(&self) -> Result<()> {
        self.counters.cancelled.fetch_add(1, Ordering::SeqCst);
        self.stop.cancel();
        match self.script {
            Script::HangPanicOnCancel => panic!("cancel blew up"),
            Script::SlowCancel(d) => tokio::time::sleep(d).await,
            _ => {}
        }
        Ok(())
    }

    async fn dispose(&self) -> Result<()> {
        self.counters.disposed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Registry with a scripted worker for every built-in tag; tags missing from
/// `scripts` succeed
pub fn scripted_registry(
    scripts: &[(CapabilityTag, Script)],
) -> (CapabilityRegistry, Arc<WorkerCounters>) {
    let counters = Arc::new(WorkerCounters::default());
    let scripts: HashMap<CapabilityTag, Script> = scripts.iter().cloned().collect();
    let mut registry = CapabilityRegistry::new();

    for tag in CapabilityTag::builtin() {
        let script = scripts.get(&tag).copied().unwrap_or(Script::Succeed);
        let counters = counters.clone();
        registry.register(tag, move |config| {
            Ok(Arc::new(ScriptedWorker {
                id: config.worker_id,
                script,
                counters: counters.clone(),
                stop: CancellationToken::new(),
            }) as Arc<dyn Capability>)
        });
    }

    (registry, counters)
}

/// Decision policy that ignores the request
pub struct FixedPolicy(pub Vec<CapabilityTag>, pub ExecutionStrategy);

impl DecisionPolicy for FixedPolicy {
    fn analyze(&self, _request: &UserRequest) -> SpawnDecision {
        SpawnDecision {
            capabilities: self.0.clone(),
            strategy: self.1,
            priority: Priority::for_capability_count(self.0.len()),
            reasoning: "fixed".to_string(),
        }
    }
}

/// Engine with scripted workers and default config
pub fn scripted_engine(
    scripts: &[(CapabilityTag, Script)],
) -> (Orchestrator, Arc<WorkerCounters>) {
    let (registry, counters) = scripted_registry(scripts);
    let engine = Orchestrator::new(OrchestratorConfig::default()).with_capabilities(registry);
    (engine, counters)
}

/// Engine with dry-run workers and default config
pub fn dry_run_engine() -> Orchestrator {
    Orchestrator::new(OrchestratorConfig::default())
        .with_capabilities(CapabilityRegistry::new().with_dry_run())
}

pub fn request(description: &str) -> UserRequest {
    UserRequest::new("req-e2e", "chat", description)
}
