//! `write_files`: persist files or FileSpecs to disk under a root

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::context::Context;
use crate::error::{RecipeError, Result};
use crate::executor::Executor;
use crate::step::{parse_config, Step};

const STEP_TYPE: &str = "write_files";

#[derive(Debug, Deserialize)]
struct FileEntry {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    path_key: Option<String>,
    #[serde(default)]
    content: Option<Value>,
    #[serde(default)]
    content_key: Option<String>,
}

fn default_root() -> String {
    ".".to_string()
}

#[derive(Debug, Deserialize)]
struct WriteFilesConfig {
    #[serde(default)]
    files_key: Option<String>,
    #[serde(default)]
    files: Option<Vec<FileEntry>>,
    #[serde(default = "default_root")]
    root: String,
}

pub fn create(config: &Value) -> Result<Box<dyn Step>> {
    let config: WriteFilesConfig = parse_config(STEP_TYPE, config)?;
    if config.files.is_none() && config.files_key.is_none() {
        return Err(RecipeError::ConfigValidation {
            step_type: STEP_TYPE.to_string(),
            message: "one of 'files' or 'files_key' is required".to_string(),
        });
    }
    if let Some(entries) = &config.files {
        for (index, entry) in entries.iter().enumerate() {
            if entry.path.is_none() && entry.path_key.is_none() {
                return Err(RecipeError::ConfigValidation {
                    step_type: STEP_TYPE.to_string(),
                    message: format!("files[{index}] needs 'path' or 'path_key'"),
                });
            }
            if entry.content.is_none() && entry.content_key.is_none() {
                return Err(RecipeError::ConfigValidation {
                    step_type: STEP_TYPE.to_string(),
                    message: format!("files[{index}] needs 'content' or 'content_key'"),
                });
            }
        }
    }
    Ok(Box::new(WriteFilesStep { config }))
}

#[derive(Debug)]
struct WriteFilesStep {
    config: WriteFilesConfig,
}

#[async_trait]
impl Step for WriteFilesStep {
    async fn execute(&self, context: &mut Context, executor: &Executor) -> Result<()> {
        let vars = context.snapshot();
        let templates = executor.templates();
        let root = templates.render(&self.config.root, &vars)?;

        // `files` wins over `files_key` when both are present.
        let pairs: Vec<(String, Value)> = if let Some(entries) = &self.config.files {
            let mut pairs = Vec::with_capacity(entries.len());
            for entry in entries {
                let path = match (&entry.path, &entry.path_key) {
                    (Some(path), _) => templates.render(path, &vars)?,
                    (None, Some(key)) => match context.require(key)? {
                        Value::String(path) => path.clone(),
                        other => {
                            return Err(invalid_input(
                                key,
                                format!(
                                    "path under '{key}' must be a string, got {}",
                                    crate::recipe::json_type_name(other)
                                ),
                            ))
                        }
                    },
                    (None, None) => unreachable!("entry shape validated at construction"),
                };
                let content = match (&entry.content, &entry.content_key) {
                    (Some(content), _) => content.clone(),
                    (None, Some(key)) => context.require(key)?.clone(),
                    (None, None) => unreachable!("entry shape validated at construction"),
                };
                pairs.push((path, content));
            }
            pairs
        } else {
            let key = self.config.files_key.as_deref().unwrap();
            collect_file_specs(key, context.require(key)?)?
        };

        for (path, content) in pairs {
            let target = normalize_path(&Path::new(&root).join(&path));
            if let Some(parent) = target.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
            let text = content_to_string(&content)?;
            tokio::fs::write(&target, text.as_bytes()).await?;
            info!(path = %target.display(), bytes = text.len(), "wrote file");
        }
        Ok(())
    }
}

/// Accept a FileSpec, a list of FileSpecs, a `{path, content}` mapping, or a
/// list of such mappings.
fn collect_file_specs(key: &str, value: &Value) -> Result<Vec<(String, Value)>> {
    match value {
        Value::Object(_) => Ok(vec![spec_pair(key, value)?]),
        Value::Array(items) => items.iter().map(|item| spec_pair(key, item)).collect(),
        other => Err(invalid_input(
            key,
            format!(
                "expected a file spec or a list of file specs, got {}",
                crate::recipe::json_type_name(other)
            ),
        )),
    }
}

fn spec_pair(key: &str, value: &Value) -> Result<(String, Value)> {
    let map = value
        .as_object()
        .ok_or_else(|| invalid_input(key, "file spec entries must be mappings".to_string()))?;
    let path = map
        .get("path")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid_input(key, "file spec is missing a string 'path'".to_string()))?;
    let content = map
        .get("content")
        .cloned()
        .ok_or_else(|| invalid_input(key, "file spec is missing 'content'".to_string()))?;
    Ok((path.to_string(), content))
}

fn invalid_input(key: &str, message: String) -> RecipeError {
    RecipeError::InvalidFilesInput {
        key: key.to_string(),
        message,
    }
}

/// Serialize structured content as indented JSON; write strings verbatim.
fn content_to_string(content: &Value) -> Result<String> {
    Ok(match content {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Object(_) | Value::Array(_) => serde_json::to_string_pretty(content)?,
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
    })
}

/// Lexically normalize a path (resolve `.` and `..` components).
fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(Component::ParentDir);
                }
            }
            other => normalized.push(other),
        }
    }
    if normalized.as_os_str().is_empty() {
        normalized.push(".");
    }
    normalized
}
