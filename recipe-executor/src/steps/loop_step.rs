//! `loop`: iterate a collection with bounded concurrency
//!
//! Each iteration runs the substeps against an isolated clone of the parent
//! context, with the current element under `item_key` (plus `__index` for
//! lists or `__key` for mappings). Successful results land in a container
//! mirroring the input type under `result_key`, positioned by iteration key
//! rather than completion order; failures are recorded under
//! `<result_key>__errors`. Iteration failures never propagate out of the
//! loop itself.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{RecipeError, Result};
use crate::executor::Executor;
use crate::recipe::StepDefinition;
use crate::step::{parse_config, Step};

const STEP_TYPE: &str = "loop";

fn default_max_concurrency() -> usize {
    1
}

fn default_fail_fast() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct LoopConfig {
    items: Value,
    item_key: String,
    substeps: Vec<StepDefinition>,
    result_key: String,
    #[serde(default = "default_max_concurrency")]
    max_concurrency: usize,
    #[serde(default)]
    delay: f64,
    #[serde(default = "default_fail_fast")]
    fail_fast: bool,
}

pub fn create(config: &Value) -> Result<Box<dyn Step>> {
    let config: LoopConfig = parse_config(STEP_TYPE, config)?;
    Ok(Box::new(LoopStep { config }))
}

#[derive(Debug)]
struct LoopStep {
    config: LoopConfig,
}

/// Iteration unit key: list index or mapping key.
#[derive(Debug, Clone)]
enum IterationKey {
    Index(usize),
    Key(String),
}

/// The resolved collection, preserving its kind for result mirroring.
enum Collection {
    List(Vec<Value>),
    Map(Vec<(String, Value)>),
}

#[async_trait]
impl Step for LoopStep {
    async fn execute(&self, context: &mut Context, executor: &Executor) -> Result<()> {
        let vars = context.snapshot();
        let templates = executor.templates();

        let item_key = templates.render(&self.config.item_key, &vars)?;
        let result_key = templates.render(&self.config.result_key, &vars)?;
        let collection = self.resolve_items(context, executor)?;

        let is_map = matches!(collection, Collection::Map(_));
        let entries: Vec<(IterationKey, Value)> = match collection {
            Collection::List(items) => items
                .into_iter()
                .enumerate()
                .map(|(index, value)| (IterationKey::Index(index), value))
                .collect(),
            Collection::Map(pairs) => pairs
                .into_iter()
                .map(|(key, value)| (IterationKey::Key(key), value))
                .collect(),
        };

        if entries.is_empty() {
            debug!(result_key = %result_key, "loop over empty collection");
            let empty = if is_map {
                Value::Object(Map::new())
            } else {
                Value::Array(Vec::new())
            };
            context.set(result_key, empty);
            return Ok(());
        }

        let total = entries.len();
        debug!(
            total,
            max_concurrency = self.config.max_concurrency,
            fail_fast = self.config.fail_fast,
            "starting loop"
        );

        let substeps = Arc::new(self.config.substeps.clone());
        let item_key = Arc::new(item_key);

        // (launch position, key, outcome) triples, ordered later
        let mut successes: Vec<(usize, IterationKey, Value)> = Vec::new();
        let mut failures: Vec<(usize, IterationKey, String)> = Vec::new();

        if self.config.max_concurrency == 1 {
            for (position, (key, value)) in entries.into_iter().enumerate() {
                let outcome = run_iteration(
                    executor.clone(),
                    context.isolate(),
                    Arc::clone(&substeps),
                    Arc::clone(&item_key),
                    key.clone(),
                    value,
                )
                .await;
                match outcome {
                    Ok(processed) => successes.push((position, key, processed)),
                    Err(error) => {
                        warn!(position, error = %error, "loop iteration failed");
                        failures.push((position, key, error.to_string()));
                        if self.config.fail_fast {
                            break;
                        }
                    }
                }
            }
        } else {
            let capacity = if self.config.max_concurrency == 0 {
                total
            } else {
                self.config.max_concurrency
            };
            let semaphore = Arc::new(Semaphore::new(capacity));
            let mut tasks: JoinSet<(usize, IterationKey, Result<Value>)> = JoinSet::new();
            let mut abandoned = false;

            for (position, (key, value)) in entries.into_iter().enumerate() {
                // Drain finished iterations so fail-fast can stop launching.
                while let Some(joined) = tasks.try_join_next() {
                    record_joined(joined, &mut successes, &mut failures);
                }
                if self.config.fail_fast && !failures.is_empty() {
                    abandoned = true;
                    break;
                }

                let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                    break;
                };
                if position > 0 && self.config.delay > 0.0 {
                    tokio::time::sleep(Duration::from_secs_f64(self.config.delay)).await;
                }

                let executor = executor.clone();
                let iteration_context = context.isolate();
                let substeps = Arc::clone(&substeps);
                let item_key = Arc::clone(&item_key);
                tasks.spawn(async move {
                    let _permit = permit;
                    let outcome = run_iteration(
                        executor,
                        iteration_context,
                        substeps,
                        Arc::clone(&item_key),
                        key.clone(),
                        value,
                    )
                    .await;
                    (position, key, outcome)
                });
            }

            if !abandoned {
                while let Some(joined) = tasks.join_next().await {
                    record_joined(joined, &mut successes, &mut failures);
                    if self.config.fail_fast && !failures.is_empty() {
                        break;
                    }
                }
            }
            // Outstanding iterations may finish on their own; their results
            // are ignored.
            tasks.detach_all();
        }

        successes.sort_by_key(|(position, _, _)| *position);
        failures.sort_by_key(|(position, _, _)| *position);

        let results = if is_map {
            let mut map = Map::new();
            for (_, key, value) in successes {
                if let IterationKey::Key(key) = key {
                    map.insert(key, value);
                }
            }
            Value::Object(map)
        } else {
            Value::Array(successes.into_iter().map(|(_, _, value)| value).collect())
        };

        debug!(result_key = %result_key, errors = failures.len(), "loop finished");
        let error_count = failures.len();
        context.set(result_key.clone(), results);
        if error_count > 0 {
            let errors = if is_map {
                let mut map = Map::new();
                for (_, key, message) in failures {
                    if let IterationKey::Key(key) = key {
                        map.insert(key, json!({ "error": message }));
                    }
                }
                Value::Object(map)
            } else {
                Value::Array(
                    failures
                        .into_iter()
                        .map(|(_, key, message)| {
                            let index = match key {
                                IterationKey::Index(index) => index,
                                IterationKey::Key(_) => unreachable!("list keys are indices"),
                            };
                            json!({ "index": index, "error": message })
                        })
                        .collect(),
                )
            };
            context.set(format!("{result_key}__errors"), errors);
        }
        Ok(())
    }
}

impl LoopStep {
    /// Resolve `items` to a list or mapping.
    ///
    /// A string is rendered, then tried as a dot path into the context, then
    /// as a literal JSON collection.
    fn resolve_items(&self, context: &Context, executor: &Executor) -> Result<Collection> {
        let vars = context.snapshot();
        let templates = executor.templates();
        let resolved = match &self.config.items {
            Value::String(expression) => {
                let rendered = templates.render(expression, &vars)?;
                match lookup_dot_path(context, rendered.trim()) {
                    Some(value) => value,
                    None => serde_json::from_str::<Value>(&rendered).map_err(|_| {
                        RecipeError::InvalidItems(format!(
                            "'{rendered}' is neither a context path nor a literal collection"
                        ))
                    })?,
                }
            }
            literal @ (Value::Array(_) | Value::Object(_)) => {
                templates.render_value(literal, &vars)?
            }
            other => {
                return Err(RecipeError::InvalidItems(format!(
                    "items must be a string, list, or mapping, got {}",
                    crate::recipe::json_type_name(other)
                )))
            }
        };

        match resolved {
            Value::Array(items) => Ok(Collection::List(items)),
            Value::Object(map) => Ok(Collection::Map(map.into_iter().collect())),
            other => Err(RecipeError::InvalidItems(format!(
                "items resolved to {}, expected a list or mapping",
                crate::recipe::json_type_name(&other)
            ))),
        }
    }
}

/// Resolve a dot path (`a.b.0.c`) against context artifacts.
fn lookup_dot_path(context: &Context, path: &str) -> Option<Value> {
    let mut segments = path.split('.');
    let mut current = context.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current.clone())
}

/// One loop iteration against an isolated context clone.
async fn run_iteration(
    executor: Executor,
    mut iteration_context: Context,
    substeps: Arc<Vec<StepDefinition>>,
    item_key: Arc<String>,
    key: IterationKey,
    value: Value,
) -> Result<Value> {
    iteration_context.set(item_key.as_str(), value.clone());
    match &key {
        IterationKey::Index(index) => iteration_context.set("__index", json!(index)),
        IterationKey::Key(map_key) => iteration_context.set("__key", json!(map_key)),
    }

    executor
        .execute_definitions(&substeps, &mut iteration_context)
        .await?;

    // Substeps may rewrite the item in place; fall back to the original.
    Ok(iteration_context
        .get(item_key.as_str())
        .cloned()
        .unwrap_or(value))
}

type Joined = std::result::Result<(usize, IterationKey, Result<Value>), tokio::task::JoinError>;

fn record_joined(
    joined: Joined,
    successes: &mut Vec<(usize, IterationKey, Value)>,
    failures: &mut Vec<(usize, IterationKey, String)>,
) {
    match joined {
        Ok((position, key, Ok(value))) => successes.push((position, key, value)),
        Ok((position, key, Err(error))) => {
            warn!(position, error = %error, "loop iteration failed");
            failures.push((position, key, error.to_string()));
        }
        Err(join_error) => {
            if !join_error.is_cancelled() {
                warn!(error = %join_error, "loop iteration task aborted");
            }
        }
    }
}
