//! `conditional`: evaluate a boolean expression and run one of two branches

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::condition;
use crate::context::Context;
use crate::error::{RecipeError, Result};
use crate::executor::Executor;
use crate::recipe::StepDefinition;
use crate::step::{parse_config, Step};

const STEP_TYPE: &str = "conditional";

#[derive(Debug, Default, Deserialize)]
struct Branch {
    #[serde(default)]
    steps: Vec<StepDefinition>,
}

#[derive(Debug, Deserialize)]
struct ConditionalConfig {
    condition: Value,
    #[serde(default)]
    if_true: Option<Branch>,
    #[serde(default)]
    if_false: Option<Branch>,
}

pub fn create(config: &Value) -> Result<Box<dyn Step>> {
    let config: ConditionalConfig = parse_config(STEP_TYPE, config)?;
    match &config.condition {
        Value::Bool(_) | Value::String(_) => {}
        other => {
            return Err(RecipeError::ConfigValidation {
                step_type: STEP_TYPE.to_string(),
                message: format!(
                    "'condition' must be a boolean or a string, got {}",
                    crate::recipe::json_type_name(other)
                ),
            })
        }
    }
    Ok(Box::new(ConditionalStep { config }))
}

#[derive(Debug)]
struct ConditionalStep {
    config: ConditionalConfig,
}

#[async_trait]
impl Step for ConditionalStep {
    async fn execute(&self, context: &mut Context, executor: &Executor) -> Result<()> {
        let outcome = match &self.config.condition {
            Value::Bool(value) => *value,
            Value::String(expression) => {
                let vars = context.snapshot();
                let rendered = executor.templates().render(expression, &vars)?;
                condition::evaluate(&rendered)?
            }
            _ => unreachable!("condition shape validated at construction"),
        };
        debug!(outcome, "conditional evaluated");

        let branch = if outcome {
            self.config.if_true.as_ref()
        } else {
            self.config.if_false.as_ref()
        };
        // An absent branch is a no-op.
        if let Some(branch) = branch {
            executor.execute_definitions(&branch.steps, context).await?;
        }
        Ok(())
    }
}
