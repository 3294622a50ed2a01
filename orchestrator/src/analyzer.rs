//! Request analysis: which capabilities does a request need?
//!
//! The engine only depends on the [`DecisionPolicy`] trait, so the keyword
//! matcher below can be swapped for a better classifier without touching the
//! resolver or scheduler.

use crate::types::{CapabilityTag, ExecutionStrategy, Priority, SpawnDecision, UserRequest};

/// Maps a request to a spawn decision
///
/// Implementations must be pure and deterministic: no I/O, and identical
/// descriptions must yield identical decisions.
pub trait DecisionPolicy: Send + Sync {
    fn analyze(&self, request: &UserRequest) -> SpawnDecision;
}

/// Keywords that select a single capability
#[derive(Debug, Clone)]
pub struct KeywordRule {
    pub capability: CapabilityTag,
    pub keywords: Vec<String>,
}

impl KeywordRule {
    pub fn new(capability: CapabilityTag, keywords: &[&str]) -> Self {
        Self {
            capability,
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    /// First keyword found as a substring of the (lower-cased) text
    fn first_match(&self, text: &str) -> Option<&str> {
        self.keywords
            .iter()
            .find(|k| text.contains(k.as_str()))
            .map(String::as_str)
    }
}

/// Substring keyword matching over the request description
#[derive(Debug, Clone)]
pub struct KeywordAnalyzer {
    rules: Vec<KeywordRule>,
}

impl Default for KeywordAnalyzer {
    fn default() -> Self {
        Self::new(vec![
            KeywordRule::new(
                CapabilityTag::FILE_DISCOVERY,
                &["find", "search", "locate", "discover", "look for", "where is", "grep"],
            ),
            KeywordRule::new(
                CapabilityTag::PLANNING,
                &["plan", "design", "architect", "strategy", "approach", "break down"],
            ),
            KeywordRule::new(
                CapabilityTag::EDITING,
                &[
                    "implement", "fix", "edit", "change", "modify", "refactor", "add",
                    "update", "write", "rename", "create",
                ],
            ),
            KeywordRule::new(
                CapabilityTag::REVIEWING,
                &["review", "lint", "audit", "inspect", "critique", "check"],
            ),
            KeywordRule::new(
                CapabilityTag::TESTING,
                &["test", "coverage", "verify", "assert"],
            ),
        ])
    }
}

impl KeywordAnalyzer {
    /// Rules are evaluated in order; that order is the capability order of
    /// every decision
    pub fn new(rules: Vec<KeywordRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[KeywordRule] {
        &self.rules
    }

    /// Strategy policy: 0-1 sequential, discovery plus one other parallel,
    /// 3+ dag, any other pair sequential
    pub fn select_strategy(capabilities: &[CapabilityTag]) -> ExecutionStrategy {
        match capabilities.len() {
            0 | 1 => ExecutionStrategy::Sequential,
            2 if capabilities.contains(&CapabilityTag::FILE_DISCOVERY) => {
                ExecutionStrategy::Parallel
            }
            2 => ExecutionStrategy::Sequential,
            _ => ExecutionStrategy::Dag,
        }
    }
}

impl DecisionPolicy for KeywordAnalyzer {
    fn analyze(&self, request: &UserRequest) -> SpawnDecision {
        let text = request.description.to_lowercase();

        let mut capabilities = Vec::new();
        let mut matched = Vec::new();
        for rule in &self.rules {
            if capabilities.contains(&rule.capability) {
                continue;
            }
            if let Some(keyword) = rule.first_match(&text) {
                matched.push(format!("{} (\"{}\")", rule.capability, keyword));
                capabilities.push(rule.capability.clone());
            }
        }

        let strategy = Self::select_strategy(&capabilities);
        let priority = Priority::for_capability_count(capabilities.len());

        let reasoning = if matched.is_empty() {
            "No capability keywords matched; nothing to run".to_string()
        } else {
            format!(
                "Matched {}; {} capabilities run {}",
                matched.join(", "),
                capabilities.len(),
                strategy
            )
        };

        SpawnDecision {
            capabilities,
            strategy,
            priority,
            reasoning,
        }
    }
}
