//! Error taxonomy for the orchestration engine
//!
//! Only [`OrchestratorError::Validation`] and
//! [`OrchestratorError::CircularDependency`] ever escape `process_request`;
//! every other variant is converted into a failed stage by the lifecycle
//! manager and reported through [`WorkerError`].

use serde::{Deserialize, Serialize};

use crate::types::CapabilityTag;

/// Errors that can occur while orchestrating a request
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Unknown capability: {0}")]
    UnknownCapability(CapabilityTag),

    #[error("Circular dependency among capabilities: {}", format_tags(.remaining))]
    CircularDependency { remaining: Vec<CapabilityTag> },

    #[error("Worker execution failed: {0}")]
    WorkerExecution(String),

    #[error("Worker timed out after {0}ms")]
    Timeout(u64),

    #[error("Workflow cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

fn format_tags(tags: &[CapabilityTag]) -> String {
    tags.iter()
        .map(CapabilityTag::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

impl OrchestratorError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::UnknownCapability(_) => "UNKNOWN_CAPABILITY",
            Self::CircularDependency { .. } => "CIRCULAR_DEPENDENCY",
            Self::WorkerExecution(_) => "WORKER_EXECUTION_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Parse(_) => "PARSE_ERROR",
        }
    }

    /// Whether retrying the same unit could plausibly succeed
    pub fn recoverable(&self) -> bool {
        matches!(
            self,
            Self::WorkerExecution(_) | Self::Timeout(_) | Self::Cancelled | Self::Io(_)
        )
    }

    /// Fatal errors abort the whole request instead of a single stage
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::CircularDependency { .. } | Self::Config(_)
        )
    }

    /// Convert into the structured form attached to a stage result
    pub fn to_worker_error(&self) -> WorkerError {
        WorkerError {
            code: self.code().to_string(),
            message: self.to_string(),
            recoverable: self.recoverable(),
        }
    }
}

/// Structured failure carried in a worker or stage result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerError {
    pub code: String,
    pub message: String,
    pub recoverable: bool,
}

impl WorkerError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            recoverable,
        }
    }
}

impl From<OrchestratorError> for WorkerError {
    fn from(err: OrchestratorError) -> Self {
        err.to_worker_error()
    }
}
