//! `recipe-executor` command-line interface
//!
//! Loads a recipe, seeds the context from `--context`/`--config` key=value
//! pairs, runs it, and exits 0 on success or 1 on any failure. The final
//! stderr line on failure identifies the failing top-level step, its type,
//! and the error kind.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::Parser;
use indexmap::IndexMap;
use recipe_executor::{Context, Executor, Recipe, RecipeError};
use serde_json::Value;
use tracing::{debug, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;

#[derive(Debug, Parser)]
#[command(
    name = "recipe-executor",
    about = "Execute a JSON-defined recipe against a shared context",
    version
)]
struct Cli {
    /// Recipe file: JSON, or markdown with a ```json fenced block
    recipe_path: PathBuf,

    /// Initial context artifacts, repeatable
    #[arg(long = "context", value_name = "KEY=VALUE")]
    context: Vec<String>,

    /// Context configuration values, repeatable
    #[arg(long = "config", value_name = "KEY=VALUE")]
    config: Vec<String>,

    /// Directory to write recipe-executor.log into
    #[arg(long = "log-dir", value_name = "DIR")]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(message) = init_logging(cli.log_dir.as_deref()) {
        eprintln!("error: {message}");
        process::exit(EXIT_ERROR);
    }

    process::exit(run(cli).await);
}

async fn run(cli: Cli) -> i32 {
    let artifacts = match parse_pairs(&cli.context) {
        Ok(pairs) => pairs,
        Err(message) => {
            eprintln!("error: {message}");
            return EXIT_ERROR;
        }
    };
    let config = match parse_pairs(&cli.config) {
        Ok(pairs) => pairs,
        Err(message) => {
            eprintln!("error: {message}");
            return EXIT_ERROR;
        }
    };

    let executor = match Executor::new() {
        Ok(executor) => executor,
        Err(error) => {
            eprintln!("error: failed to initialize executor: {error}");
            return EXIT_ERROR;
        }
    };

    let recipe = match Recipe::from_path(&cli.recipe_path).await {
        Ok(recipe) => recipe,
        Err(error) => {
            eprintln!("error: {error} ({})", error.kind());
            return EXIT_ERROR;
        }
    };
    info!(
        path = %cli.recipe_path.display(),
        steps = recipe.steps.len(),
        "loaded recipe"
    );

    let mut context = Context::with_parts(artifacts, config);
    match executor.execute(&recipe, &mut context).await {
        Ok(()) => {
            info!("recipe finished");
            EXIT_SUCCESS
        }
        Err(error) => {
            debug!(artifacts = ?context.keys().collect::<Vec<_>>(), "context at failure");
            eprintln!("{}", summarize(&error));
            EXIT_ERROR
        }
    }
}

/// Parse repeated `key=value` arguments; values stay strings.
fn parse_pairs(pairs: &[String]) -> Result<IndexMap<String, Value>, String> {
    let mut map = IndexMap::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(format!("expected KEY=VALUE, got '{pair}'"));
        };
        if key.is_empty() {
            return Err(format!("empty key in '{pair}'"));
        }
        map.insert(key.to_string(), Value::String(value.to_string()));
    }
    Ok(map)
}

/// Final summary line: step index and type (for top-level steps), error
/// kind, and message.
fn summarize(error: &RecipeError) -> String {
    match error {
        RecipeError::StepFailed {
            index,
            step_type,
            source,
        } => {
            let cause = source.root_cause();
            format!(
                "error: step {index} ({step_type}) failed with {}: {cause}",
                cause.kind()
            )
        }
        other => format!("error: {other} ({})", other.kind()),
    }
}

fn init_logging(log_dir: Option<&Path>) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let file_layer = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .map_err(|e| format!("failed to create log directory: {e}"))?;
            let file = std::fs::File::create(dir.join("recipe-executor.log"))
                .map_err(|e| format!("failed to create log file: {e}"))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(Arc::new(file))
                    .with_ansi(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(())
}
