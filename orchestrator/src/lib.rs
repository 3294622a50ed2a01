//! Multi-capability workflow orchestration engine
//!
//! This crate provides:
//! - Request analysis behind a replaceable [`DecisionPolicy`]
//! - A data-driven capability dependency table resolved into execution waves
//! - Sequential, parallel and dependency-wave execution strategies
//! - A worker lifecycle (create, initialize, execute, dispose) bounded by an
//!   admission semaphore, per-worker timeouts and cooperative cancellation
//! - Workflow tracking and result aggregation
//!
//! # Example
//!
//! ```rust,ignore
//! use agent_orchestrator::{CapabilityRegistry, Orchestrator, OrchestratorConfig, UserRequest};
//!
//! let engine = Orchestrator::new(OrchestratorConfig::default())
//!     .with_capabilities(CapabilityRegistry::new().with_dry_run());
//!
//! let result = engine
//!     .process_request(UserRequest::new("req-1", "chat", "find and fix the bug"))
//!     .await?;
//! assert!(result.success);
//! ```

pub mod analyzer;
pub mod capability;
pub mod config;
pub mod dry_run;
pub mod engine;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod messages;
pub mod resolver;
pub mod scheduler;
pub mod types;
pub mod workflow;

pub use analyzer::{DecisionPolicy, KeywordAnalyzer, KeywordRule};
pub use capability::{
    Capability, CapabilityRegistry, WorkerConfig, WorkerInput, WorkerOutput, WorkerResult,
};
pub use config::{DependencyFailurePolicy, OrchestratorConfig};
pub use dry_run::DryRunCapability;
pub use engine::Orchestrator;
pub use error::{OrchestratorError, WorkerError};
pub use events::{event_channel, EventReceiver, WorkflowEvent, WorkflowEventSender};
pub use lifecycle::WorkerLifecycleManager;
pub use messages::{AgentMessage, MessageBus, MessageType};
pub use resolver::{DependencyResolver, DependencyTable};
pub use scheduler::ExecutionScheduler;
pub use types::{
    CapabilityTag, ExecutionStrategy, Priority, RequestContext, RequestPreferences, SpawnDecision,
    UserRequest,
};
pub use workflow::{
    ArtifactKind, ExecutionWorkflow, StageStatus, WorkflowArtifact, WorkflowRegistry,
    WorkflowResult, WorkflowStage, WorkflowStageResult, WorkflowStatus,
};

/// Re-exported so capability implementations need not depend on tokio-util directly
pub use tokio_util::sync::CancellationToken;
