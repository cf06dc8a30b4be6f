//! Recipe executor
//!
//! Walks a recipe's steps strictly in order against a shared context. The
//! same executor recurses for sub-recipes (`execute_recipe`) and inline
//! steps lists (`conditional` branches, `loop` substeps, `parallel`
//! substeps); it is cheaply cloneable so fan-out steps can move copies into
//! spawned tasks.

use std::sync::Arc;

use recipe_executor_templating::TemplateEngine;
use tracing::{debug, error};

use crate::context::Context;
use crate::error::{RecipeError, Result};
use crate::llm::{LlmClient, UnconfiguredLlmClient};
use crate::recipe::{Recipe, StepDefinition};
use crate::step::StepRegistry;

/// Safety rail for `execute_recipe` nesting.
pub const MAX_RECIPE_DEPTH: usize = 64;

/// Loads, validates, and runs recipes.
#[derive(Clone)]
pub struct Executor {
    registry: Arc<StepRegistry>,
    templates: Arc<TemplateEngine>,
    llm: Arc<dyn LlmClient>,
    depth: usize,
}

impl Executor {
    /// An executor with the built-in step registry and no LLM provider.
    pub fn new() -> Result<Self> {
        Ok(Self {
            registry: Arc::new(StepRegistry::with_builtins()),
            templates: Arc::new(TemplateEngine::new()?),
            llm: Arc::new(UnconfiguredLlmClient),
            depth: 0,
        })
    }

    /// Replace the step registry.
    pub fn with_registry(mut self, registry: StepRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Install an LLM provider for `llm_generate` steps.
    pub fn with_llm_client(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = llm;
        self
    }

    /// The template engine shared by all steps.
    pub fn templates(&self) -> &TemplateEngine {
        &self.templates
    }

    /// The configured LLM client.
    pub fn llm(&self) -> Arc<dyn LlmClient> {
        Arc::clone(&self.llm)
    }

    /// Run a recipe against the context.
    pub async fn execute(&self, recipe: &Recipe, context: &mut Context) -> Result<()> {
        self.execute_definitions(&recipe.steps, context).await
    }

    /// Load a recipe from a path and run it.
    pub async fn execute_path(
        &self,
        path: impl AsRef<std::path::Path>,
        context: &mut Context,
    ) -> Result<()> {
        let recipe = Recipe::from_path(path).await?;
        self.execute(&recipe, context).await
    }

    /// Run an inline steps list sequentially against the context.
    ///
    /// A failing step is logged and wrapped as [`RecipeError::StepFailed`]
    /// with its index and type; the underlying error stays on the source
    /// chain.
    pub async fn execute_definitions(
        &self,
        steps: &[StepDefinition],
        context: &mut Context,
    ) -> Result<()> {
        for (index, definition) in steps.iter().enumerate() {
            debug!(index, step_type = %definition.step_type, "executing step");
            if let Err(source) = self.run_step(definition, context).await {
                error!(
                    index,
                    step_type = %definition.step_type,
                    kind = source.kind(),
                    %source,
                    "step failed"
                );
                return Err(RecipeError::StepFailed {
                    index,
                    step_type: definition.step_type.clone(),
                    source: Box::new(source),
                });
            }
        }
        Ok(())
    }

    pub(crate) async fn run_step(
        &self,
        definition: &StepDefinition,
        context: &mut Context,
    ) -> Result<()> {
        let step = self
            .registry
            .create(&definition.step_type, &definition.config)?;
        step.execute(context, self).await
    }

    /// A copy of this executor one sub-recipe level deeper.
    pub(crate) fn descend(&self) -> Result<Executor> {
        if self.depth >= MAX_RECIPE_DEPTH {
            return Err(RecipeError::RecursionLimit(MAX_RECIPE_DEPTH));
        }
        let mut child = self.clone();
        child.depth += 1;
        Ok(child)
    }
}
