//! `llm_generate`: render a prompt, dispatch to the LLM, coerce the output
//!
//! Output coercion follows the requested `output_format`: `"text"` stores
//! the returned string, `"files"` stores the unwrapped FileSpec list, an
//! object schema stores the returned mapping, and a one-element schema list
//! is wrapped as an items-array schema whose `items` field is stored
//! unwrapped.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::context::Context;
use crate::error::{RecipeError, Result};
use crate::executor::Executor;
use crate::llm::{FileSpec, LlmOutput, LlmRequest};
use crate::mcp::McpServerSpec;
use crate::step::{parse_config, Step};

const STEP_TYPE: &str = "llm_generate";

fn default_model() -> String {
    "openai/gpt-4o".to_string()
}

fn default_output_key() -> String {
    "llm_output".to_string()
}

#[derive(Debug, Deserialize)]
struct LlmGenerateConfig {
    prompt: String,
    #[serde(default = "default_model")]
    model: String,
    #[serde(default)]
    max_tokens: Option<Value>,
    #[serde(default)]
    mcp_servers: Option<Vec<Value>>,
    output_format: Value,
    #[serde(default = "default_output_key")]
    output_key: String,
}

/// Classified `output_format`, resolved once at construction.
#[derive(Debug, Clone, PartialEq)]
enum OutputFormat {
    Text,
    Files,
    /// A JSON-object schema
    Object(Value),
    /// A one-element schema list, already wrapped as an items-array schema
    List(Value),
}

impl OutputFormat {
    fn classify(format: &Value) -> Result<Self> {
        match format {
            Value::String(name) if name == "text" => Ok(OutputFormat::Text),
            Value::String(name) if name == "files" => Ok(OutputFormat::Files),
            Value::Object(_) => Ok(OutputFormat::Object(format.clone())),
            Value::Array(items) if items.len() == 1 && items[0].is_object() => {
                let inner = items[0].clone();
                Ok(OutputFormat::List(json!({
                    "type": "object",
                    "properties": {
                        "items": { "type": "array", "items": inner }
                    },
                    "required": ["items"]
                })))
            }
            other => Err(RecipeError::InvalidOutputFormat(format!(
                "expected \"text\", \"files\", an object schema, or a one-element schema list, got {}",
                serde_json::to_string(other).unwrap_or_else(|_| "<unprintable>".to_string())
            ))),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            OutputFormat::Text => "text",
            OutputFormat::Files => "files",
            OutputFormat::Object(_) => "object schema",
            OutputFormat::List(_) => "list schema",
        }
    }
}

pub fn create(config: &Value) -> Result<Box<dyn Step>> {
    let config: LlmGenerateConfig = parse_config(STEP_TYPE, config)?;
    let format = OutputFormat::classify(&config.output_format)?;
    match &config.max_tokens {
        None | Some(Value::Null) | Some(Value::Number(_)) | Some(Value::String(_)) => {}
        Some(other) => {
            return Err(RecipeError::ConfigValidation {
                step_type: STEP_TYPE.to_string(),
                message: format!(
                    "'max_tokens' must be an integer or a string, got {}",
                    crate::recipe::json_type_name(other)
                ),
            })
        }
    }
    Ok(Box::new(LlmGenerateStep { config, format }))
}

#[derive(Debug)]
struct LlmGenerateStep {
    config: LlmGenerateConfig,
    format: OutputFormat,
}

#[async_trait]
impl Step for LlmGenerateStep {
    async fn execute(&self, context: &mut Context, executor: &Executor) -> Result<()> {
        let vars = context.snapshot();
        let templates = executor.templates();

        let prompt = templates.render(&self.config.prompt, &vars)?;
        let model = templates.render(&self.config.model, &vars)?;
        let output_key = templates.render(&self.config.output_key, &vars)?;

        let max_tokens = match &self.config.max_tokens {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => Some(n.as_u64().ok_or_else(|| {
                RecipeError::ConfigValidation {
                    step_type: STEP_TYPE.to_string(),
                    message: format!("'max_tokens' must be a non-negative integer, got {n}"),
                }
            })?),
            Some(Value::String(raw)) => {
                let rendered = templates.render(raw, &vars)?;
                let trimmed = rendered.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.parse::<u64>().map_err(|_| {
                        RecipeError::ConfigValidation {
                            step_type: STEP_TYPE.to_string(),
                            message: format!("'max_tokens' rendered to '{trimmed}', not an integer"),
                        }
                    })?)
                }
            }
            _ => unreachable!("max_tokens shape validated at construction"),
        };

        // Step-level servers first, then process-level config servers.
        let mut server_values: Vec<Value> = self.config.mcp_servers.clone().unwrap_or_default();
        if let Some(Value::Array(configured)) = context.config().get("mcp_servers") {
            server_values.extend(configured.iter().cloned());
        }
        let mut mcp_servers = Vec::with_capacity(server_values.len());
        for value in server_values {
            let rendered = templates.render_value(&value, &vars)?;
            let spec: McpServerSpec =
                serde_json::from_value(rendered).map_err(|e| RecipeError::ConfigValidation {
                    step_type: STEP_TYPE.to_string(),
                    message: format!("invalid mcp_servers entry: {e}"),
                })?;
            mcp_servers.push(spec);
        }

        let output = match &self.format {
            OutputFormat::Text => LlmOutput::Text,
            OutputFormat::Files => LlmOutput::Files,
            OutputFormat::Object(schema) | OutputFormat::List(schema) => {
                LlmOutput::Schema(schema.clone())
            }
        };

        info!(model = %model, format = self.format.label(), "dispatching LLM generation");
        let request = LlmRequest {
            prompt,
            model: model.clone(),
            max_tokens,
            output,
            mcp_servers,
        };
        let raw = executor
            .llm()
            .generate(request)
            .await
            .map_err(|e| self.llm_error(&model, e.to_string()))?;

        let value = self.coerce(&model, raw)?;
        debug!(output_key = %output_key, "stored LLM output");
        context.set(output_key, value);
        Ok(())
    }
}

impl LlmGenerateStep {
    fn llm_error(&self, model: &str, message: String) -> RecipeError {
        RecipeError::Llm {
            model: model.to_string(),
            format: self.format.label().to_string(),
            message,
        }
    }

    /// Validate and unwrap the client response per the requested format.
    fn coerce(&self, model: &str, raw: Value) -> Result<Value> {
        match &self.format {
            OutputFormat::Text => match raw {
                Value::String(_) => Ok(raw),
                other => Err(self.llm_error(
                    model,
                    format!(
                        "expected a string response, got {}",
                        crate::recipe::json_type_name(&other)
                    ),
                )),
            },
            OutputFormat::Files => {
                let files = raw
                    .get("files")
                    .and_then(Value::as_array)
                    .cloned()
                    .ok_or_else(|| {
                        self.llm_error(model, "expected a { \"files\": [...] } response".to_string())
                    })?;
                for file in &files {
                    serde_json::from_value::<FileSpec>(file.clone()).map_err(|e| {
                        self.llm_error(model, format!("invalid file spec in response: {e}"))
                    })?;
                }
                Ok(Value::Array(files))
            }
            OutputFormat::Object(_) => match raw {
                Value::Object(_) => Ok(raw),
                other => Err(self.llm_error(
                    model,
                    format!(
                        "expected an object response, got {}",
                        crate::recipe::json_type_name(&other)
                    ),
                )),
            },
            OutputFormat::List(_) => raw
                .get("items")
                .and_then(Value::as_array)
                .cloned()
                .map(Value::Array)
                .ok_or_else(|| {
                    self.llm_error(model, "expected an { \"items\": [...] } response".to_string())
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_text_and_files() {
        assert_eq!(
            OutputFormat::classify(&json!("text")).unwrap(),
            OutputFormat::Text
        );
        assert_eq!(
            OutputFormat::classify(&json!("files")).unwrap(),
            OutputFormat::Files
        );
    }

    #[test]
    fn classify_object_schema() {
        let schema = json!({"type": "object", "properties": {"name": {"type": "string"}}});
        assert_eq!(
            OutputFormat::classify(&schema).unwrap(),
            OutputFormat::Object(schema)
        );
    }

    #[test]
    fn classify_wraps_one_element_list() {
        let inner = json!({"type": "object", "properties": {"id": {"type": "integer"}}});
        let format = OutputFormat::classify(&json!([inner])).unwrap();
        let OutputFormat::List(wrapped) = format else {
            panic!("expected a list format");
        };
        assert_eq!(wrapped["type"], json!("object"));
        assert_eq!(wrapped["properties"]["items"]["items"], inner);
        assert_eq!(wrapped["required"], json!(["items"]));
    }

    #[test]
    fn classify_rejects_other_shapes() {
        for bad in [json!("words"), json!(3), json!([]), json!([1, 2]), json!([{"a": 1}, {"b": 2}])] {
            assert!(matches!(
                OutputFormat::classify(&bad),
                Err(RecipeError::InvalidOutputFormat(_))
            ));
        }
    }
}
