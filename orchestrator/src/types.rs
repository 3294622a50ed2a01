//! Request and decision types
//!
//! A [`UserRequest`] is the immutable input supplied by the caller. The request
//! analyzer turns it into a [`SpawnDecision`]: which capabilities to run and
//! which [`ExecutionStrategy`] to run them with.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;

// ============================================================================
// Capability Tags
// ============================================================================

/// Identifier of a pluggable capability (e.g. `file-discovery`, `editing`)
///
/// Tags are open-ended strings so new capabilities can be registered without
/// changing this type; the built-in ones are provided as constants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityTag(Cow<'static, str>);

impl CapabilityTag {
    pub const FILE_DISCOVERY: CapabilityTag = CapabilityTag(Cow::Borrowed("file-discovery"));
    pub const PLANNING: CapabilityTag = CapabilityTag(Cow::Borrowed("planning"));
    pub const EDITING: CapabilityTag = CapabilityTag(Cow::Borrowed("editing"));
    pub const REVIEWING: CapabilityTag = CapabilityTag(Cow::Borrowed("reviewing"));
    pub const TESTING: CapabilityTag = CapabilityTag(Cow::Borrowed("testing"));

    /// Create a tag from any string
    pub fn new(tag: impl Into<String>) -> Self {
        Self(Cow::Owned(tag.into()))
    }

    /// Built-in tags in canonical order
    pub fn builtin() -> [CapabilityTag; 5] {
        [
            Self::FILE_DISCOVERY,
            Self::PLANNING,
            Self::EDITING,
            Self::REVIEWING,
            Self::TESTING,
        ]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CapabilityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CapabilityTag {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

impl From<String> for CapabilityTag {
    fn from(tag: String) -> Self {
        Self::new(tag)
    }
}

// ============================================================================
// User Request
// ============================================================================

/// Editor context attached to a request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<String>,
}

/// Caller preferences, forwarded untouched to every capability
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPreferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_apply: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_strategies: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_tests: Option<bool>,
}

/// A single user request entering the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRequest {
    /// Caller-assigned request id
    pub id: String,
    /// Request kind as reported by the caller (e.g. "chat", "command")
    pub kind: String,
    /// Free-text description of what the user wants
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub context: RequestContext,
    #[serde(default)]
    pub preferences: RequestPreferences,
}

impl UserRequest {
    /// Create a request with empty context and preferences
    pub fn new(
        id: impl Into<String>,
        kind: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            description: description.into(),
            context: RequestContext::default(),
            preferences: RequestPreferences::default(),
        }
    }

    /// Set the editor context
    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    /// Set the preferences
    pub fn with_preferences(mut self, preferences: RequestPreferences) -> Self {
        self.preferences = preferences;
        self
    }

    /// Reject malformed requests before any workflow is created
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.id.trim().is_empty() {
            return Err(OrchestratorError::Validation(
                "request id must not be empty".to_string(),
            ));
        }
        if self.id.chars().any(char::is_whitespace) {
            return Err(OrchestratorError::Validation(format!(
                "request id '{}' must not contain whitespace",
                self.id
            )));
        }
        if self.kind.trim().is_empty() {
            return Err(OrchestratorError::Validation(
                "request kind must not be empty".to_string(),
            ));
        }
        if let Some(files) = &self.context.files {
            if files.iter().any(|f| f.trim().is_empty()) {
                return Err(OrchestratorError::Validation(
                    "context.files must not contain empty paths".to_string(),
                ));
            }
        }
        if let Some(root) = &self.context.workspace_root {
            if root.trim().is_empty() {
                return Err(OrchestratorError::Validation(
                    "context.workspaceRoot must not be empty when present".to_string(),
                ));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Spawn Decision
// ============================================================================

/// How the capabilities of a decision are executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// One after another, chaining outputs, stopping at the first failure
    Sequential,
    /// All at once, no chaining, all results collected
    Parallel,
    /// Topological waves over the dependency table
    Dag,
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => f.write_str("sequential"),
            Self::Parallel => f.write_str("parallel"),
            Self::Dag => f.write_str("dag"),
        }
    }
}

/// Scheduling priority hint attached to a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Priority {
    /// More capabilities means a larger, more involved request
    pub fn for_capability_count(count: usize) -> Self {
        match count {
            0 | 1 => Self::Low,
            2 => Self::Normal,
            _ => Self::High,
        }
    }
}

/// Which capabilities a request needs and how to run them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnDecision {
    /// Capabilities in execution order, without duplicates
    pub capabilities: Vec<CapabilityTag>,
    pub strategy: ExecutionStrategy,
    pub priority: Priority,
    /// Human-readable explanation of the decision
    pub reasoning: String,
}

impl SpawnDecision {
    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}
