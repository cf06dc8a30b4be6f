//! Error types for recipe execution
//!
//! Every failure surfaced by the engine is a [`RecipeError`]. Errors are not
//! recovered locally; they travel up through `execute` to the caller. The
//! executor wraps a failing step in [`RecipeError::StepFailed`] so callers
//! (and the CLI summary line) can identify the step index and type while the
//! underlying error stays reachable through the source chain.

use std::path::PathBuf;

use thiserror::Error;

pub use recipe_executor_templating::TemplateError;

/// Result type alias for recipe operations
pub type Result<T> = std::result::Result<T, RecipeError>;

/// Errors that can occur while loading or executing a recipe
#[derive(Debug, Error)]
pub enum RecipeError {
    /// Input could not be parsed as a recipe, or `steps` is absent/malformed
    #[error("failed to load recipe: {0}")]
    RecipeLoad(String),

    /// Step `type` is not present in the registry
    #[error("unknown step type: {0}")]
    UnknownStepType(String),

    /// A step's `config` failed validation at instantiation
    #[error("invalid config for step '{step_type}': {message}")]
    ConfigValidation {
        /// The step type whose config failed validation
        step_type: String,
        /// What was wrong with the config
        message: String,
    },

    /// Context access for a missing required key
    #[error("missing artifact: {0}")]
    MissingArtifact(String),

    /// Template syntax or filter error
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// A conditional expression rendered but failed to evaluate
    #[error("condition evaluation failed: {0}")]
    Condition(String),

    /// Non-optional file missing in `read_files` or `execute_recipe`
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// `write_files` input under `files_key` has an unsupported shape
    #[error("invalid files input under '{key}': {message}")]
    InvalidFilesInput {
        /// The context key the input was read from
        key: String,
        /// Why the shape was rejected
        message: String,
    },

    /// `loop` items resolved to nil or a non-collection
    #[error("invalid loop items: {0}")]
    InvalidItems(String),

    /// `llm_generate.output_format` is malformed
    #[error("invalid output_format: {0}")]
    InvalidOutputFormat(String),

    /// Wrapped error from the LLM client
    #[error("LLM generation failed for model '{model}' ({format}): {message}")]
    Llm {
        /// Rendered model identifier
        model: String,
        /// Requested output format
        format: String,
        /// Underlying client message
        message: String,
    },

    /// Wrapped error from an MCP session or tool call
    #[error("MCP call failed for server '{server}': {message}")]
    Mcp {
        /// Server descriptor (command or URL)
        server: String,
        /// Underlying session/tool message
        message: String,
    },

    /// First fault in a `parallel` step
    #[error("parallel substep {index} failed: {source}")]
    ParallelFailure {
        /// Index of the failing substep
        index: usize,
        /// The underlying failure
        #[source]
        source: Box<RecipeError>,
    },

    /// A step failed during execution; wraps the underlying error with the
    /// step index and type for diagnostics
    #[error("step {index} ({step_type}) failed: {source}")]
    StepFailed {
        /// Zero-based index of the step in its steps list
        index: usize,
        /// The step's registered type name
        step_type: String,
        /// The underlying failure
        #[source]
        source: Box<RecipeError>,
    },

    /// Sub-recipe nesting exceeded the safety limit
    #[error("sub-recipe depth exceeded the limit of {0}")]
    RecursionLimit(usize),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RecipeError {
    /// Short name of the error kind, for log and summary lines.
    pub fn kind(&self) -> &'static str {
        match self {
            RecipeError::RecipeLoad(_) => "RecipeLoadError",
            RecipeError::UnknownStepType(_) => "UnknownStepType",
            RecipeError::ConfigValidation { .. } => "ConfigValidationError",
            RecipeError::MissingArtifact(_) => "MissingArtifact",
            RecipeError::Template(_) => "TemplateError",
            RecipeError::Condition(_) => "ConditionError",
            RecipeError::FileNotFound(_) => "FileNotFound",
            RecipeError::InvalidFilesInput { .. } => "InvalidFilesInput",
            RecipeError::InvalidItems(_) => "InvalidItems",
            RecipeError::InvalidOutputFormat(_) => "InvalidOutputFormat",
            RecipeError::Llm { .. } => "LLMError",
            RecipeError::Mcp { .. } => "MCPError",
            RecipeError::ParallelFailure { .. } => "ParallelFailure",
            RecipeError::StepFailed { .. } => "StepFailed",
            RecipeError::RecursionLimit(_) => "RecursionLimit",
            RecipeError::Io(_) => "IoError",
            RecipeError::Json(_) => "JsonError",
        }
    }

    /// Walk through `StepFailed` wrappers to the innermost failure.
    pub fn root_cause(&self) -> &RecipeError {
        match self {
            RecipeError::StepFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
