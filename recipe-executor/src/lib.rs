//! Recipe execution engine
//!
//! A declarative workflow runtime: recipes are JSON documents describing an
//! ordered sequence of typed steps executed against a shared, mutable
//! [`Context`]. Steps perform file I/O, invoke LLM providers, call MCP tool
//! servers, compose sub-recipes, branch, loop, and fan out in parallel; the
//! engine is the generic substrate and recipes encode the application
//! logic.
//!
//! # Example
//!
//! ```no_run
//! use recipe_executor::{Context, Executor, Recipe};
//! use serde_json::json;
//!
//! # async fn example() -> recipe_executor::Result<()> {
//! let recipe = Recipe::from_value(json!({
//!     "steps": [
//!         { "type": "set_context", "config": { "key": "greeting", "value": "hi {{ name }}" } },
//!         { "type": "write_files", "config": {
//!             "files": [ { "path": "hello.txt", "content_key": "greeting" } ],
//!             "root": "out"
//!         } }
//!     ]
//! }))?;
//!
//! let executor = Executor::new()?;
//! let mut context = Context::new();
//! executor.execute(&recipe, &mut context).await?;
//! # Ok(())
//! # }
//! ```

pub mod condition;
pub mod context;
pub mod error;
pub mod executor;
pub mod llm;
pub mod mcp;
pub mod recipe;
pub mod step;
pub mod steps;

pub use context::Context;
pub use error::{RecipeError, Result, TemplateError};
pub use executor::{Executor, MAX_RECIPE_DEPTH};
pub use llm::{FileSpec, LlmClient, LlmClientError, LlmOutput, LlmRequest, UnconfiguredLlmClient};
pub use mcp::{McpClientError, McpServerSpec, McpSession};
pub use recipe::{Recipe, StepDefinition};
pub use step::{Step, StepFactory, StepRegistry};
