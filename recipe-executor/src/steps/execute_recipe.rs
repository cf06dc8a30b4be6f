//! `execute_recipe`: run a sub-recipe with context overrides
//!
//! Overrides are rendered structurally; a rendered string that parses as a
//! JSON object or array is replaced by the parsed structure, so recipes can
//! inject structured data through string-valued templates. The sub-recipe
//! runs against the same context and its mutations persist.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::context::Context;
use crate::error::{RecipeError, Result};
use crate::executor::Executor;
use crate::recipe::Recipe;
use crate::step::{parse_config, Step};

const STEP_TYPE: &str = "execute_recipe";

#[derive(Debug, Deserialize)]
struct ExecuteRecipeConfig {
    recipe_path: String,
    #[serde(default)]
    context_overrides: Map<String, Value>,
}

pub fn create(config: &Value) -> Result<Box<dyn Step>> {
    let config: ExecuteRecipeConfig = parse_config(STEP_TYPE, config)?;
    Ok(Box::new(ExecuteRecipeStep { config }))
}

#[derive(Debug)]
struct ExecuteRecipeStep {
    config: ExecuteRecipeConfig,
}

#[async_trait]
impl Step for ExecuteRecipeStep {
    async fn execute(&self, context: &mut Context, executor: &Executor) -> Result<()> {
        let vars = context.snapshot();
        let templates = executor.templates();

        let recipe_path = templates.render(&self.config.recipe_path, &vars)?;
        if !matches!(tokio::fs::try_exists(&recipe_path).await, Ok(true)) {
            return Err(RecipeError::FileNotFound(recipe_path.into()));
        }

        for (key, value) in &self.config.context_overrides {
            let rendered = templates.render_value(value, &vars)?;
            context.set(key.clone(), parse_structured_strings(rendered));
        }

        debug!(path = %recipe_path, "executing sub-recipe");
        let recipe = Recipe::from_path(&recipe_path).await?;
        let sub_executor = executor.descend()?;
        sub_executor.execute(&recipe, context).await
    }
}

/// Replace rendered strings that parse as JSON objects/arrays with the
/// parsed structure; recurse into lists and mappings.
fn parse_structured_strings(value: Value) -> Value {
    match value {
        Value::String(text) => {
            let trimmed = text.trim_start();
            if trimmed.starts_with('{') || trimmed.starts_with('[') {
                match serde_json::from_str::<Value>(&text) {
                    Ok(parsed @ (Value::Object(_) | Value::Array(_))) => parsed,
                    _ => Value::String(text),
                }
            } else {
                Value::String(text)
            }
        }
        Value::Array(items) => {
            Value::Array(items.into_iter().map(parse_structured_strings).collect())
        }
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, parse_structured_strings(v)))
                .collect(),
        ),
        other => other,
    }
}
