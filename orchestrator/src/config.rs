//! Configuration loading (.orchestrator.toml)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;
use crate::resolver::DependencyTable;

/// Config file name searched for in the directory tree
pub const CONFIG_FILE_NAME: &str = ".orchestrator.toml";

/// Find a config file by walking up the directory tree, then checking global config.
///
/// Search order:
/// 1. Current directory and parent directories (walking up to root)
/// 2. Global config at ~/.config/orchestrator/
fn find_config_file(filename: &str) -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let candidate = current.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_path = config_dir.join("orchestrator").join(filename);
        if global_path.exists() {
            return Some(global_path);
        }
    }

    None
}

/// What the dag strategy does with dependents of a failed stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyFailurePolicy {
    /// Mark dependents of a failed dependency as skipped without running them
    #[default]
    SkipDependents,
    /// Run dependents anyway with whatever outputs are available
    Continue,
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub engine: EngineSection,

    /// Additions/overrides merged over the built-in dependency table
    #[serde(default = "DependencyTable::empty")]
    pub dependencies: DependencyTable,
}

/// Engine section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    /// Admission limit: workers allowed to run at the same time
    #[serde(default = "default_max_concurrent_workers")]
    pub max_concurrent_workers: usize,

    /// Per-worker timeout; 0 disables it
    #[serde(default = "default_worker_timeout_secs")]
    pub worker_timeout_secs: u64,

    #[serde(default)]
    pub dependency_failure: DependencyFailurePolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            engine: EngineSection::default(),
            dependencies: DependencyTable::empty(),
        }
    }
}

fn default_max_concurrent_workers() -> usize {
    4
}

fn default_worker_timeout_secs() -> u64 {
    300
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_concurrent_workers: default_max_concurrent_workers(),
            worker_timeout_secs: default_worker_timeout_secs(),
            dependency_failure: DependencyFailurePolicy::default(),
        }
    }
}

impl EngineSection {
    pub fn worker_timeout(&self) -> Option<Duration> {
        (self.worker_timeout_secs > 0).then(|| Duration::from_secs(self.worker_timeout_secs))
    }
}

impl OrchestratorConfig {
    /// Load config from .orchestrator.toml
    ///
    /// Search order:
    /// 1. Walk up directory tree from cwd looking for .orchestrator.toml
    /// 2. Check ~/.config/orchestrator/.orchestrator.toml (global fallback)
    /// 3. Fall back to defaults
    pub fn load() -> Result<Self, OrchestratorError> {
        if let Some(config_path) = find_config_file(CONFIG_FILE_NAME) {
            tracing::debug!("Loading config from: {}", config_path.display());
            return Self::load_from_path(&config_path);
        }

        tracing::debug!("No {} found, using defaults", CONFIG_FILE_NAME);
        Ok(Self::default())
    }

    /// Load from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, OrchestratorError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| OrchestratorError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    /// Parse from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, OrchestratorError> {
        toml::from_str(toml_str).map_err(|e| OrchestratorError::Parse(e.to_string()))
    }

    /// Built-in dependency table with the configured overrides applied
    pub fn dependency_table(&self) -> DependencyTable {
        let mut table = DependencyTable::builtin();
        table.merge(self.dependencies.clone());
        table
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.engine.max_concurrent_workers == 0 {
            return Err(OrchestratorError::Config(
                "engine.max_concurrent_workers must be at least 1".to_string(),
            ));
        }
        self.dependency_table().validate()
    }
}
