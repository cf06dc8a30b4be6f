//! Liquid template rendering for the recipe executor
//!
//! Every step resolves its dynamic strings through [`TemplateEngine`]:
//! one-shot rendering, nested (fixed-point) rendering, and structural
//! rendering of JSON values where only string leaves are touched.

mod engine;
mod filters;

pub use engine::{contains_template_syntax, TemplateEngine};

use thiserror::Error;

/// Errors produced while parsing or rendering a template.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// The template could not be parsed as Liquid
    #[error("template parse error: {0}")]
    Parse(String),
    /// The template parsed but failed to render
    #[error("template render error: {0}")]
    Render(String),
}
