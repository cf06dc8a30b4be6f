//! `read_files`: read one or more files into a context artifact

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{RecipeError, Result};
use crate::executor::Executor;
use crate::step::{parse_config, Step};

const STEP_TYPE: &str = "read_files";

#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum MergeMode {
    #[default]
    Concat,
    Dict,
}

#[derive(Debug, Deserialize)]
struct ReadFilesConfig {
    path: Value,
    content_key: String,
    #[serde(default)]
    optional: bool,
    #[serde(default)]
    merge_mode: MergeMode,
}

pub fn create(config: &Value) -> Result<Box<dyn Step>> {
    let config: ReadFilesConfig = parse_config(STEP_TYPE, config)?;
    match &config.path {
        Value::String(_) => {}
        Value::Array(items) if items.iter().all(Value::is_string) => {}
        other => {
            return Err(RecipeError::ConfigValidation {
                step_type: STEP_TYPE.to_string(),
                message: format!(
                    "'path' must be a string or a list of strings, got {}",
                    crate::recipe::json_type_name(other)
                ),
            })
        }
    }
    Ok(Box::new(ReadFilesStep { config }))
}

#[derive(Debug)]
struct ReadFilesStep {
    config: ReadFilesConfig,
}

#[async_trait]
impl Step for ReadFilesStep {
    async fn execute(&self, context: &mut Context, executor: &Executor) -> Result<()> {
        let vars = context.snapshot();
        let templates = executor.templates();

        let content_key = templates.render(&self.config.content_key, &vars)?;

        let paths: Vec<String> = match &self.config.path {
            Value::String(path) => {
                let rendered = templates.render(path, &vars)?;
                if rendered.contains(',') {
                    rendered
                        .split(',')
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .map(String::from)
                        .collect()
                } else {
                    vec![rendered]
                }
            }
            Value::Array(items) => {
                let mut rendered = Vec::with_capacity(items.len());
                for item in items {
                    // validated as strings at construction
                    if let Value::String(path) = item {
                        rendered.push(templates.render(path, &vars)?);
                    }
                }
                rendered
            }
            _ => unreachable!("path shape validated at construction"),
        };

        let requested = paths.len();
        let mut contents: Vec<(String, Value)> = Vec::new();
        for path in paths {
            match tokio::fs::read_to_string(&path).await {
                Ok(raw) => {
                    debug!(path = %path, bytes = raw.len(), "read file");
                    contents.push((path.clone(), parse_by_extension(&path, raw)));
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    if self.config.optional {
                        warn!(path = %path, "optional file missing, skipping");
                    } else {
                        return Err(RecipeError::FileNotFound(path.into()));
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        let combined = combine(contents, requested, self.config.merge_mode);
        context.set(content_key, combined);
        Ok(())
    }
}

/// Parse file content by extension; degrade to the raw string on failure.
fn parse_by_extension(path: &str, raw: String) -> Value {
    let extension = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match extension.as_str() {
        "json" => match serde_json::from_str(&raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(path = %path, error = %e, "failed to parse JSON, keeping raw text");
                Value::String(raw)
            }
        },
        "yaml" | "yml" => match serde_yaml_ng::from_str(&raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(path = %path, error = %e, "failed to parse YAML, keeping raw text");
                Value::String(raw)
            }
        },
        _ => Value::String(raw),
    }
}

fn combine(contents: Vec<(String, Value)>, requested: usize, mode: MergeMode) -> Value {
    match contents.len() {
        0 => {
            if mode == MergeMode::Dict && requested > 1 {
                Value::Object(Map::new())
            } else {
                Value::String(String::new())
            }
        }
        1 => contents
            .into_iter()
            .next()
            .map(|(_, value)| value)
            .unwrap_or(Value::Null),
        _ => match mode {
            MergeMode::Concat => {
                let segments: Vec<String> = contents
                    .into_iter()
                    .map(|(path, value)| {
                        let text = match value {
                            Value::String(s) => s,
                            other => serde_json::to_string(&other).unwrap_or_default(),
                        };
                        format!("{path}\n{text}")
                    })
                    .collect();
                Value::String(segments.join("\n"))
            }
            MergeMode::Dict => {
                let mut map = Map::new();
                for (path, value) in contents {
                    map.insert(path, value);
                }
                Value::Object(map)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn single_file_keeps_raw_value() {
        let combined = combine(
            vec![("a.txt".to_string(), json!("body"))],
            1,
            MergeMode::Concat,
        );
        assert_eq!(combined, json!("body"));
    }

    #[test]
    fn zero_files_concat_is_empty_string() {
        assert_eq!(combine(Vec::new(), 1, MergeMode::Concat), json!(""));
    }

    #[test]
    fn zero_files_dict_multi_request_is_empty_object() {
        assert_eq!(combine(Vec::new(), 2, MergeMode::Dict), json!({}));
    }

    #[test]
    fn zero_files_dict_single_request_is_empty_string() {
        assert_eq!(combine(Vec::new(), 1, MergeMode::Dict), json!(""));
    }

    #[test]
    fn multiple_files_concat_labels_segments() {
        let combined = combine(
            vec![
                ("a.txt".to_string(), json!("one")),
                ("b.json".to_string(), json!({"k": 1})),
            ],
            2,
            MergeMode::Concat,
        );
        assert_eq!(combined, json!("a.txt\none\nb.json\n{\"k\":1}"));
    }

    #[test]
    fn multiple_files_dict_maps_by_path() {
        let combined = combine(
            vec![
                ("a.txt".to_string(), json!("one")),
                ("b.txt".to_string(), json!("two")),
            ],
            2,
            MergeMode::Dict,
        );
        assert_eq!(combined, json!({"a.txt": "one", "b.txt": "two"}));
    }

    #[test]
    fn json_extension_parses() {
        assert_eq!(
            parse_by_extension("data.json", r#"{"a": 1}"#.to_string()),
            json!({"a": 1})
        );
    }

    #[test]
    fn yaml_extension_parses() {
        assert_eq!(
            parse_by_extension("data.yaml", "a: 1\nb: [2, 3]\n".to_string()),
            json!({"a": 1, "b": [2, 3]})
        );
    }

    #[test]
    fn broken_json_degrades_to_raw_string() {
        assert_eq!(
            parse_by_extension("data.json", "not json".to_string()),
            json!("not json")
        );
    }

    #[test]
    fn unknown_extension_is_raw_text() {
        assert_eq!(
            parse_by_extension("notes.md", "# hi".to_string()),
            json!("# hi")
        );
    }
}
