//! Agent runtime: one model-driven tool loop per run.
//!
//! An agent is a static [`AgentConfig`] (prompt, model, tools, limits). A run
//! sends the task to the model, executes every tool call it asks for, feeds
//! the results back and stops at a final answer, an error or the iteration
//! cap. Runs never raise: the outcome is always an [`AgentResult`].

mod agent_loop;
mod prompt;
mod types;

pub use agent_loop::{AgentRuntime, RunFailure};
pub use prompt::build_system_prompt;
pub use types::{AgentConfig, AgentContext, AgentResult, ToolCallRecord};
