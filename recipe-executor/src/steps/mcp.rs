//! `mcp`: open an MCP session, invoke a named tool, capture the result
//!
//! Transport selection follows the server mapping: a `command` field means
//! stdio (spawn the server as a child process), otherwise `url` selects the
//! HTTP/SSE transport. Rendered env values that come out empty are looked
//! up in a local `.env` file before being forwarded.

use std::path::Path;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::context::Context;
use crate::error::{RecipeError, Result};
use crate::executor::Executor;
use crate::mcp::{result_to_mapping, HttpServerSpec, McpServerSpec, McpSession, StdioServerSpec};
use crate::step::{parse_config, Step};

const STEP_TYPE: &str = "mcp";

fn default_result_key() -> String {
    "tool_result".to_string()
}

#[derive(Debug, Deserialize)]
struct McpStepConfig {
    server: Map<String, Value>,
    tool_name: String,
    #[serde(default)]
    arguments: Map<String, Value>,
    #[serde(default = "default_result_key")]
    result_key: String,
}

pub fn create(config: &Value) -> Result<Box<dyn Step>> {
    let config: McpStepConfig = parse_config(STEP_TYPE, config)?;
    if !config.server.contains_key("command") && !config.server.contains_key("url") {
        return Err(RecipeError::ConfigValidation {
            step_type: STEP_TYPE.to_string(),
            message: "'server' needs 'command' (stdio) or 'url' (HTTP)".to_string(),
        });
    }
    Ok(Box::new(McpStep { config }))
}

#[derive(Debug)]
struct McpStep {
    config: McpStepConfig,
}

#[async_trait]
impl Step for McpStep {
    async fn execute(&self, context: &mut Context, executor: &Executor) -> Result<()> {
        let vars = context.snapshot();
        let templates = executor.templates();

        let tool_name = templates.render(&self.config.tool_name, &vars)?;
        let result_key = templates.render(&self.config.result_key, &vars)?;

        let mut arguments = Map::new();
        for (name, value) in &self.config.arguments {
            let rendered = match value {
                Value::String(raw) => Value::String(templates.render(raw, &vars)?),
                other => other.clone(),
            };
            arguments.insert(name.clone(), rendered);
        }

        let spec = self.build_server_spec(executor, &vars)?;
        let descriptor = spec.descriptor();

        let mut session = McpSession::connect(&spec)
            .await
            .map_err(|e| mcp_error(&descriptor, e.to_string()))?;
        let outcome = session.call_tool(&tool_name, Value::Object(arguments)).await;
        // Session is released on every exit path.
        session.shutdown().await;
        let result = outcome.map_err(|e| mcp_error(&descriptor, e.to_string()))?;

        debug!(tool = %tool_name, result_key = %result_key, "stored MCP tool result");
        context.set(result_key, result_to_mapping(result));
        Ok(())
    }
}

impl McpStep {
    fn build_server_spec(
        &self,
        executor: &Executor,
        vars: &Map<String, Value>,
    ) -> Result<McpServerSpec> {
        let templates = executor.templates();
        let server = &self.config.server;

        if let Some(command) = server.get("command") {
            let command = expect_string("server.command", command)?;
            let command = templates.render(command, vars)?;

            let mut args = Vec::new();
            if let Some(value) = server.get("args") {
                for (index, arg) in expect_array("server.args", value)?.iter().enumerate() {
                    let arg = expect_string(&format!("server.args[{index}]"), arg)?;
                    args.push(templates.render(arg, vars)?);
                }
            }

            let mut env = IndexMap::new();
            if let Some(value) = server.get("env") {
                for (name, raw) in expect_object("server.env", value)? {
                    let raw = expect_string(&format!("server.env.{name}"), raw)?;
                    let mut rendered = templates.render(raw, vars)?;
                    // An empty rendered value falls back to the local .env file.
                    if rendered.is_empty() {
                        if let Some(from_dotenv) = lookup_dotenv(name) {
                            rendered = from_dotenv;
                        }
                    }
                    env.insert(name.clone(), rendered);
                }
            }

            let working_dir = match server.get("working_dir") {
                Some(value) => Some(templates.render(expect_string("server.working_dir", value)?, vars)?),
                None => None,
            };

            return Ok(McpServerSpec::Stdio(StdioServerSpec {
                command,
                args,
                env,
                working_dir,
            }));
        }

        let url = server
            .get("url")
            .ok_or_else(|| RecipeError::ConfigValidation {
                step_type: STEP_TYPE.to_string(),
                message: "'server' needs 'command' (stdio) or 'url' (HTTP)".to_string(),
            })?;
        let url = templates.render(expect_string("server.url", url)?, vars)?;

        let mut headers = IndexMap::new();
        if let Some(value) = server.get("headers") {
            for (name, raw) in expect_object("server.headers", value)? {
                let raw = expect_string(&format!("server.headers.{name}"), raw)?;
                headers.insert(name.clone(), templates.render(raw, vars)?);
            }
        }

        Ok(McpServerSpec::Http(HttpServerSpec { url, headers }))
    }
}

fn expect_string<'a>(field: &str, value: &'a Value) -> Result<&'a str> {
    value.as_str().ok_or_else(|| RecipeError::ConfigValidation {
        step_type: STEP_TYPE.to_string(),
        message: format!("'{field}' must be a string"),
    })
}

fn expect_array<'a>(field: &str, value: &'a Value) -> Result<&'a Vec<Value>> {
    value.as_array().ok_or_else(|| RecipeError::ConfigValidation {
        step_type: STEP_TYPE.to_string(),
        message: format!("'{field}' must be a list"),
    })
}

fn expect_object<'a>(field: &str, value: &'a Value) -> Result<&'a Map<String, Value>> {
    value.as_object().ok_or_else(|| RecipeError::ConfigValidation {
        step_type: STEP_TYPE.to_string(),
        message: format!("'{field}' must be a mapping"),
    })
}

fn mcp_error(server: &str, message: String) -> RecipeError {
    RecipeError::Mcp {
        server: server.to_string(),
        message,
    }
}

/// Look a variable up in the local `.env` file, if one exists.
fn lookup_dotenv(name: &str) -> Option<String> {
    let entries = dotenvy::from_path_iter(Path::new(".env")).ok()?;
    for entry in entries {
        if let Ok((key, value)) = entry {
            if key == name {
                return Some(value);
            }
        }
    }
    None
}
