//! Workflow progress events
//!
//! Capability-agnostic stage start/end notifications. Callers subscribe by
//! handing the engine a [`WorkflowEventSender`]; without one, events are
//! discarded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::types::{CapabilityTag, ExecutionStrategy};
use crate::workflow::{StageStatus, WorkflowStatus};

// ============================================================================
// Workflow Events
// ============================================================================

/// Events emitted while a workflow runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// Workflow registered and about to run
    WorkflowStarted {
        workflow_id: String,
        request_id: String,
        strategy: ExecutionStrategy,
        capabilities: Vec<CapabilityTag>,
        timestamp: DateTime<Utc>,
    },

    /// A stage was spawned
    StageStarted {
        workflow_id: String,
        stage_id: String,
        capability: CapabilityTag,
        status: StageStatus,
        timestamp: DateTime<Utc>,
    },

    /// A stage reached a terminal status
    StageFinished {
        workflow_id: String,
        stage_id: String,
        capability: CapabilityTag,
        status: StageStatus,
        execution_time_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Workflow reached a terminal status
    WorkflowFinished {
        workflow_id: String,
        status: WorkflowStatus,
        execution_time_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

impl WorkflowEvent {
    pub fn workflow_id(&self) -> &str {
        match self {
            Self::WorkflowStarted { workflow_id, .. }
            | Self::StageStarted { workflow_id, .. }
            | Self::StageFinished { workflow_id, .. }
            | Self::WorkflowFinished { workflow_id, .. } => workflow_id,
        }
    }
}

// ============================================================================
// Event Channel
// ============================================================================

/// Sender for workflow events
pub type EventSender = mpsc::UnboundedSender<WorkflowEvent>;

/// Receiver for workflow events
pub type EventReceiver = mpsc::UnboundedReceiver<WorkflowEvent>;

/// Create a new event channel
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Helper for sending events with a consistent API
#[derive(Clone, Default)]
pub struct WorkflowEventSender {
    sender: Option<EventSender>,
}

impl WorkflowEventSender {
    pub fn new(sender: EventSender) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// A no-op sender (events are discarded)
    pub fn none() -> Self {
        Self { sender: None }
    }

    pub fn is_active(&self) -> bool {
        self.sender.is_some()
    }

    /// Send an event (silently fails if no sender or receiver dropped)
    pub fn send(&self, event: WorkflowEvent) {
        if let Some(ref sender) = self.sender {
            let _ = sender.send(event);
        }
    }

    pub fn workflow_started(
        &self,
        workflow_id: &str,
        request_id: &str,
        strategy: ExecutionStrategy,
        capabilities: &[CapabilityTag],
    ) {
        self.send(WorkflowEvent::WorkflowStarted {
            workflow_id: workflow_id.to_string(),
            request_id: request_id.to_string(),
            strategy,
            capabilities: capabilities.to_vec(),
            timestamp: Utc::now(),
        });
    }

    pub fn stage_started(&self, workflow_id: &str, stage_id: &str, capability: &CapabilityTag) {
        self.send(WorkflowEvent::StageStarted {
            workflow_id: workflow_id.to_string(),
            stage_id: stage_id.to_string(),
            capability: capability.clone(),
            status: StageStatus::Running,
            timestamp: Utc::now(),
        });
    }

    pub fn stage_finished(
        &self,
        workflow_id: &str,
        stage_id: &str,
        capability: &CapabilityTag,
        status: StageStatus,
        execution_time_ms: u64,
    ) {
        self.send(WorkflowEvent::StageFinished {
            workflow_id: workflow_id.to_string(),
            stage_id: stage_id.to_string(),
            capability: capability.clone(),
            status,
            execution_time_ms,
            timestamp: Utc::now(),
        });
    }

    pub fn workflow_finished(
        &self,
        workflow_id: &str,
        status: WorkflowStatus,
        execution_time_ms: u64,
    ) {
        self.send(WorkflowEvent::WorkflowFinished {
            workflow_id: workflow_id.to_string(),
            status,
            execution_time_ms,
            timestamp: Utc::now(),
        });
    }
}
