//! Built-in agent definitions, one per pipeline step.

mod definitions;

pub use definitions::{agent_for, builtin_agents};
