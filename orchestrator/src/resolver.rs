//! Capability dependency table and topological wave computation
//!
//! The table is plain data: adding a capability means adding an entry (in code
//! or in the `[dependencies]` section of `.orchestrator.toml`), never touching
//! the resolver.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;
use crate::types::CapabilityTag;

/// Static map from capability to the capabilities it depends on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DependencyTable {
    entries: BTreeMap<CapabilityTag, BTreeSet<CapabilityTag>>,
}

impl Default for DependencyTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl DependencyTable {
    /// An empty table
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// The built-in table for the five standard capabilities
    pub fn builtin() -> Self {
        Self::empty()
            .with_entry(CapabilityTag::FILE_DISCOVERY, [])
            .with_entry(CapabilityTag::PLANNING, [CapabilityTag::FILE_DISCOVERY])
            .with_entry(CapabilityTag::EDITING, [CapabilityTag::PLANNING])
            .with_entry(CapabilityTag::REVIEWING, [CapabilityTag::EDITING])
            .with_entry(CapabilityTag::TESTING, [CapabilityTag::EDITING])
    }

    /// Add or replace an entry
    pub fn with_entry(
        mut self,
        tag: CapabilityTag,
        deps: impl IntoIterator<Item = CapabilityTag>,
    ) -> Self {
        self.insert(tag, deps);
        self
    }

    pub fn insert(&mut self, tag: CapabilityTag, deps: impl IntoIterator<Item = CapabilityTag>) {
        self.entries.insert(tag, deps.into_iter().collect());
    }

    /// Overlay another table on top of this one (entries are replaced, not merged)
    pub fn merge(&mut self, overrides: DependencyTable) {
        self.entries.extend(overrides.entries);
    }

    pub fn contains(&self, tag: &CapabilityTag) -> bool {
        self.entries.contains_key(tag)
    }

    /// Declared dependencies of a tag; unknown tags have none
    pub fn dependencies_of(&self, tag: &CapabilityTag) -> BTreeSet<CapabilityTag> {
        self.entries.get(tag).cloned().unwrap_or_default()
    }

    pub fn tags(&self) -> impl Iterator<Item = &CapabilityTag> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CapabilityTag, &BTreeSet<CapabilityTag>)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check that the whole table admits a topological order
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        let all: Vec<CapabilityTag> = self.entries.keys().cloned().collect();
        DependencyResolver::new(self.clone()).waves(&all).map(|_| ())
    }
}

/// Computes DAG execution waves from a [`DependencyTable`]
#[derive(Debug, Clone, Default)]
pub struct DependencyResolver {
    table: DependencyTable,
}

impl DependencyResolver {
    pub fn new(table: DependencyTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &DependencyTable {
        &self.table
    }

    /// Split `capabilities` into waves that can each run concurrently
    ///
    /// A tag is ready once none of its declared dependencies remain
    /// unscheduled; dependencies outside the requested set are ignored.
    /// Within a wave, tags keep their order from `capabilities`.
    pub fn waves(
        &self,
        capabilities: &[CapabilityTag],
    ) -> Result<Vec<Vec<CapabilityTag>>, OrchestratorError> {
        let mut seen = HashSet::new();
        let mut remaining: Vec<CapabilityTag> = capabilities
            .iter()
            .filter(|tag| seen.insert((*tag).clone()))
            .cloned()
            .collect();

        let mut waves = Vec::new();

        while !remaining.is_empty() {
            let pending: HashSet<&CapabilityTag> = remaining.iter().collect();

            let (ready, blocked): (Vec<_>, Vec<_>) =
                remaining.iter().cloned().partition(|tag| {
                    self.table
                        .dependencies_of(tag)
                        .iter()
                        .all(|dep| !pending.contains(dep))
                });

            if ready.is_empty() {
                tracing::error!(remaining = ?blocked, "Dependency cycle detected");
                return Err(OrchestratorError::CircularDependency { remaining: blocked });
            }

            tracing::debug!(wave = waves.len(), tags = ?ready, "Resolved wave");
            waves.push(ready);
            remaining = blocked;
        }

        Ok(waves)
    }
}
