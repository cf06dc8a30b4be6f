//! LLM client contract
//!
//! The engine treats LLM provider libraries as external collaborators behind
//! the [`LlmClient`] trait: render a prompt, describe the requested output
//! shape, get back a JSON value. Output validation and coercion stay inside
//! the `llm_generate` step; clients only need to honor the requested shape.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::mcp::McpServerSpec;

/// A file produced by a generation step, later consumed by `write_files`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSpec {
    /// Relative path the file should be written to
    pub path: String,
    /// File content: a string is written verbatim, structured content is
    /// serialized as indented JSON
    pub content: Value,
}

/// The output shape requested from the LLM.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmOutput {
    /// Plain text: the client returns a JSON string
    Text,
    /// A FileSpec list: the client returns `{ "files": [ ... ] }`
    Files,
    /// A JSON-object schema: the client returns a conforming object
    Schema(Value),
}

/// A fully rendered generation request.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// Rendered prompt text
    pub prompt: String,
    /// Rendered model identifier (e.g. `openai/gpt-4o`)
    pub model: String,
    /// Optional cap on generated tokens
    pub max_tokens: Option<u64>,
    /// Requested output shape
    pub output: LlmOutput,
    /// MCP servers the model may call tools on during generation
    pub mcp_servers: Vec<McpServerSpec>,
}

/// Error from an LLM client implementation.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct LlmClientError(pub String);

/// Abstraction over LLM provider libraries.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate a value for the request. The returned JSON must match the
    /// requested [`LlmOutput`] shape.
    async fn generate(&self, request: LlmRequest) -> Result<Value, LlmClientError>;
}

/// Placeholder client installed by default; fails every request.
///
/// Embedders wire a real provider with
/// [`Executor::with_llm_client`](crate::Executor::with_llm_client).
#[derive(Debug, Default)]
pub struct UnconfiguredLlmClient;

#[async_trait]
impl LlmClient for UnconfiguredLlmClient {
    async fn generate(&self, request: LlmRequest) -> Result<Value, LlmClientError> {
        Err(LlmClientError(format!(
            "no LLM client is configured (requested model '{}')",
            request.model
        )))
    }
}
