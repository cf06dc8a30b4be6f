//! Built-in step implementations
//!
//! Nine step kinds registered by
//! [`StepRegistry::with_builtins`](crate::StepRegistry::with_builtins):
//! file I/O (`read_files`, `write_files`), context manipulation
//! (`set_context`), control flow (`conditional`, `loop`, `parallel`,
//! `execute_recipe`), and external calls (`llm_generate`, `mcp`).

pub mod conditional;
pub mod execute_recipe;
pub mod llm_generate;
pub mod loop_step;
pub mod mcp;
pub mod parallel;
pub mod read_files;
pub mod set_context;
pub mod write_files;
