//! Recipe loading and validation
//!
//! A recipe is a JSON document with an ordered `steps` list. Recipes load
//! from a filesystem path (markdown files may carry the JSON inside a
//! ```json fenced block), from raw JSON text, or from an in-memory value.
//! Unknown top-level fields are preserved but ignored by execution.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{RecipeError, Result};

static FENCED_JSON_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```json\s*\n(.*?)```").unwrap());

/// One step of a recipe: a registered type name plus its configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Step type, resolved through the step registry
    #[serde(rename = "type")]
    pub step_type: String,
    /// Step-specific configuration, validated by the step constructor
    #[serde(default)]
    pub config: Value,
}

/// A loaded recipe: ordered steps plus preserved metadata fields.
#[derive(Debug, Clone, Default)]
pub struct Recipe {
    /// The ordered steps to execute
    pub steps: Vec<StepDefinition>,
    /// Top-level fields other than `steps` (inputs, outputs, description...)
    pub extra: Map<String, Value>,
}

impl Recipe {
    /// Build a recipe from an in-memory JSON value.
    ///
    /// An object must carry a `steps` list; a bare array is accepted as the
    /// steps list itself.
    pub fn from_value(value: Value) -> Result<Self> {
        let (steps_value, extra) = match value {
            Value::Object(mut map) => {
                let steps = map
                    .remove("steps")
                    .ok_or_else(|| RecipeError::RecipeLoad("missing 'steps' field".to_string()))?;
                (steps, map)
            }
            Value::Array(_) => (value, Map::new()),
            other => {
                return Err(RecipeError::RecipeLoad(format!(
                    "expected an object or an array, got {}",
                    json_type_name(&other)
                )))
            }
        };

        let steps_list = match steps_value {
            Value::Array(items) => items,
            other => {
                return Err(RecipeError::RecipeLoad(format!(
                    "'steps' must be a list, got {}",
                    json_type_name(&other)
                )))
            }
        };

        let mut steps = Vec::with_capacity(steps_list.len());
        for (index, item) in steps_list.into_iter().enumerate() {
            let step: StepDefinition = serde_json::from_value(item).map_err(|e| {
                RecipeError::RecipeLoad(format!("step {index} is not a valid step: {e}"))
            })?;
            steps.push(step);
        }

        Ok(Self { steps, extra })
    }

    /// Parse a recipe from raw JSON text.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| RecipeError::RecipeLoad(format!("invalid JSON: {e}")))?;
        Self::from_value(value)
    }

    /// Load a recipe from a file.
    ///
    /// If the content contains a ```json fenced block (markdown recipes),
    /// the first such block is parsed; otherwise the whole file is parsed as
    /// JSON.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RecipeError::FileNotFound(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), bytes = content.len(), "loaded recipe file");

        let json_text = FENCED_JSON_RE
            .captures(&content)
            .map(|caps| caps[1].to_string())
            .unwrap_or(content);
        Self::from_json_str(&json_text)
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
