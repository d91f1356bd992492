//! # Care Agents
//!
//! A clinical multi-agent pipeline over a tool-using LLM.
//!
//! This library provides:
//! - A bounded tool-use agent loop with a retrying model transport
//! - Five built-in clinical agents and the tools they share
//! - A fail-fast pipeline orchestrator with pollable state
//! - An HTTP API for running pipelines and single agents
//!
//! ## Architecture
//!
//! Each agent follows the "tools in a loop" pattern:
//! 1. Send the task, system prompt and tool schemas to the model
//! 2. Execute any tool calls the model requests
//! 3. Feed results back, repeat until a final answer or the iteration cap
//!
//! The orchestrator chains the agents in a fixed order, publishing each
//! step's artifacts (note id, risk assessment id, ...) to the steps after it.

pub mod agent;
pub mod agents;
pub mod api;
pub mod config;
pub mod llm;
pub mod pipeline;
pub mod tools;

pub use config::Config;
