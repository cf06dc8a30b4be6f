//! Shared execution context
//!
//! The context carries artifacts (step outputs) and process-level config
//! between steps. Sequential steps share one context; concurrent fan-out
//! (loop iterations, parallel substeps) receives an [`Context::isolate`]
//! clone so sibling writes never become visible to each other.
//!
//! Artifact values are stored behind `Arc`, so isolation clones duplicate
//! only the top-level map and share nested values structurally. Steps write
//! new top-level keys instead of mutating nested values in place; the `Arc`
//! wrapper makes the latter unavailable without an explicit deep copy.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::error::{RecipeError, Result};

/// Shared mutable state threaded through a recipe run.
#[derive(Debug, Clone, Default)]
pub struct Context {
    artifacts: IndexMap<String, Arc<Value>>,
    config: Arc<IndexMap<String, Value>>,
}

impl Context {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context with initial artifacts and config.
    pub fn with_parts(
        artifacts: impl IntoIterator<Item = (String, Value)>,
        config: IndexMap<String, Value>,
    ) -> Self {
        Self {
            artifacts: artifacts
                .into_iter()
                .map(|(k, v)| (k, Arc::new(v)))
                .collect(),
            config: Arc::new(config),
        }
    }

    /// Look up an artifact.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.artifacts.get(key).map(Arc::as_ref)
    }

    /// Look up an artifact, failing with [`RecipeError::MissingArtifact`].
    pub fn require(&self, key: &str) -> Result<&Value> {
        self.get(key)
            .ok_or_else(|| RecipeError::MissingArtifact(key.to_string()))
    }

    /// Write an artifact, replacing any existing value.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.artifacts.insert(key.into(), Arc::new(value));
    }

    /// Whether an artifact exists.
    pub fn contains(&self, key: &str) -> bool {
        self.artifacts.contains_key(key)
    }

    /// Artifact keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.artifacts.keys().map(String::as_str)
    }

    /// Number of artifacts.
    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    /// Whether the context holds no artifacts.
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Process-level configuration, shared across all clones.
    pub fn config(&self) -> &IndexMap<String, Value> {
        &self.config
    }

    /// Clone for an isolated fan-out branch.
    ///
    /// Duplicates the top-level artifacts map (values shared via `Arc`) and
    /// shares config by reference. O(number of top-level artifacts).
    pub fn isolate(&self) -> Context {
        self.clone()
    }

    /// Deep snapshot of the artifacts, in insertion order.
    ///
    /// Used as template variables and for diagnostics.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.artifacts
            .iter()
            .map(|(k, v)| (k.clone(), v.as_ref().clone()))
            .collect()
    }
}
