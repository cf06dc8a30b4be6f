//! Step contract and registry
//!
//! Every step implements [`Step`]: construction validates the step's
//! configuration, execution performs the work against the shared context.
//! The registry maps type names to constructors; built-in steps are
//! registered by [`StepRegistry::with_builtins`], and embedders may register
//! additional step types before building an executor.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::context::Context;
use crate::error::{RecipeError, Result};
use crate::executor::Executor;

/// A unit of work in a recipe.
#[async_trait]
pub trait Step: Send + Sync + std::fmt::Debug {
    /// Execute the step against the shared context. Control-flow steps
    /// recurse through the executor.
    async fn execute(&self, context: &mut Context, executor: &Executor) -> Result<()>;
}

/// Constructor for a step type: validates the config and builds the step.
pub type StepFactory = fn(&Value) -> Result<Box<dyn Step>>;

/// Name → constructor table for step types.
pub struct StepRegistry {
    factories: HashMap<&'static str, StepFactory>,
}

impl StepRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry with the nine built-in step types.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("read_files", crate::steps::read_files::create);
        registry.register("write_files", crate::steps::write_files::create);
        registry.register("set_context", crate::steps::set_context::create);
        registry.register("conditional", crate::steps::conditional::create);
        registry.register("loop", crate::steps::loop_step::create);
        registry.register("parallel", crate::steps::parallel::create);
        registry.register("execute_recipe", crate::steps::execute_recipe::create);
        registry.register("llm_generate", crate::steps::llm_generate::create);
        registry.register("mcp", crate::steps::mcp::create);
        registry
    }

    /// Register (or replace) a step type.
    pub fn register(&mut self, step_type: &'static str, factory: StepFactory) {
        self.factories.insert(step_type, factory);
    }

    /// Whether a step type is registered.
    pub fn contains(&self, step_type: &str) -> bool {
        self.factories.contains_key(step_type)
    }

    /// Instantiate a step, validating its config.
    pub fn create(&self, step_type: &str, config: &Value) -> Result<Box<dyn Step>> {
        let factory = self
            .factories
            .get(step_type)
            .ok_or_else(|| RecipeError::UnknownStepType(step_type.to_string()))?;
        factory(config)
    }
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Deserialize a step's config, mapping serde failures to
/// [`RecipeError::ConfigValidation`].
pub(crate) fn parse_config<T: DeserializeOwned>(step_type: &str, config: &Value) -> Result<T> {
    serde_json::from_value(config.clone()).map_err(|e| RecipeError::ConfigValidation {
        step_type: step_type.to_string(),
        message: e.to_string(),
    })
}
