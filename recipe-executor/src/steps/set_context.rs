//! `set_context`: create or update a context artifact

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::context::Context;
use crate::error::Result;
use crate::executor::Executor;
use crate::step::{parse_config, Step};

const STEP_TYPE: &str = "set_context";

#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum IfExists {
    #[default]
    Overwrite,
    Merge,
}

#[derive(Debug, Deserialize)]
struct SetContextConfig {
    key: String,
    value: Value,
    #[serde(default)]
    nested_render: bool,
    #[serde(default)]
    if_exists: IfExists,
}

pub fn create(config: &Value) -> Result<Box<dyn Step>> {
    let config: SetContextConfig = parse_config(STEP_TYPE, config)?;
    Ok(Box::new(SetContextStep { config }))
}

#[derive(Debug)]
struct SetContextStep {
    config: SetContextConfig,
}

#[async_trait]
impl Step for SetContextStep {
    async fn execute(&self, context: &mut Context, executor: &Executor) -> Result<()> {
        let vars = context.snapshot();
        let templates = executor.templates();

        let key = templates.render(&self.config.key, &vars)?;
        let rendered = if self.config.nested_render {
            templates.render_value_nested(&self.config.value, &vars)?
        } else {
            templates.render_value(&self.config.value, &vars)?
        };

        let value = match self.config.if_exists {
            IfExists::Overwrite => rendered,
            IfExists::Merge => match context.get(&key) {
                Some(existing) => merge_values(existing, rendered),
                None => rendered,
            },
        };

        debug!(key = %key, "set context artifact");
        context.set(key, value);
        Ok(())
    }
}

/// Type-aware merge for `if_exists: "merge"`.
fn merge_values(old: &Value, new: Value) -> Value {
    match (old, new) {
        (Value::String(old), Value::String(new)) => Value::String(format!("{old}{new}")),
        (Value::Array(old), Value::Array(new)) => {
            let mut merged = old.clone();
            merged.extend(new);
            Value::Array(merged)
        }
        (Value::Array(old), new) => {
            let mut merged = old.clone();
            merged.push(new);
            Value::Array(merged)
        }
        (Value::Object(old), Value::Object(new)) => {
            let mut merged = old.clone();
            for (key, value) in new {
                merged.insert(key, value);
            }
            Value::Object(merged)
        }
        (old, new) => Value::Array(vec![old.clone(), new]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_strings_concatenates() {
        assert_eq!(
            merge_values(&json!("hello"), json!(" world")),
            json!("hello world")
        );
    }

    #[test]
    fn merge_lists_concatenates() {
        assert_eq!(merge_values(&json!([1, 2]), json!([3])), json!([1, 2, 3]));
    }

    #[test]
    fn merge_list_with_scalar_appends() {
        assert_eq!(merge_values(&json!([1, 2]), json!("x")), json!([1, 2, "x"]));
    }

    #[test]
    fn merge_mappings_is_shallow_new_wins() {
        assert_eq!(
            merge_values(&json!({"a": 1, "b": 1}), json!({"b": 2, "c": 3})),
            json!({"a": 1, "b": 2, "c": 3})
        );
    }

    #[test]
    fn merge_mismatched_types_pairs_them() {
        assert_eq!(merge_values(&json!("s"), json!(5)), json!(["s", 5]));
        assert_eq!(merge_values(&json!(1), json!([2])), json!([1, [2]]));
    }
}
